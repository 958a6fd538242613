//! Slotpay Server
//!
//! Crypto funding gateway for a token-ledger game backend: deposit
//! address issuance, withdrawal submission, idempotent webhook
//! settlement, and background reconciliation.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::ConfigLoader;
use server::{build_router, run_server};
use slotpay_core::events::{
    AlertEventReceiver, EventSenders, SettlementEventReceiver, alert_event_channel,
    settlement_event_channel, tx_event_channel,
};
use slotpay_core::gateway::CryptoGateway;
use slotpay_core::gateway::provider::ProviderClient;
use slotpay_core::ledger::BalanceLedger;
use slotpay_core::processors::{SettlementEngine, TransactionMonitor, WebhookProcessor};
use slotpay_core::store::{DepositAddressBook, PendingTransactionStore};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Slotpay - crypto funding gateway for token-ledger games
#[derive(Parser, Debug)]
#[command(name = "slotpay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./slotpay-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting slotpay-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let runtime = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = runtime.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Shared in-process state.
    let ledger = Arc::new(BalanceLedger::new());
    let store = Arc::new(PendingTransactionStore::new());
    let addresses = Arc::new(DepositAddressBook::new());

    // Typed event channels.
    let (settlement_tx, settlement_rx) = settlement_event_channel();
    let (alert_tx, alert_rx) = alert_event_channel();
    let (tx_tx, tx_rx) = tx_event_channel();
    let events = EventSenders::new(settlement_tx, alert_tx, tx_tx);

    let engine = SettlementEngine::new(
        store.clone(),
        addresses.clone(),
        ledger.clone(),
        runtime.currencies.clone(),
        events.clone(),
    );
    let provider = ProviderClient::new(&runtime.gateway);
    let gateway = Arc::new(CryptoGateway::new(
        runtime.gateway.clone(),
        runtime.currencies.clone(),
        provider,
        ledger.clone(),
        store.clone(),
        addresses.clone(),
        events.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        runtime.webhook.clone(),
        engine.clone(),
        events.clone(),
    ));

    let monitor = TransactionMonitor::new(
        runtime.monitor.clone(),
        gateway.clone(),
        engine,
        store.clone(),
        addresses.clone(),
        runtime.currencies.clone(),
        events,
    );
    let stats = monitor.stats();

    // Background tasks: the monitor loop and the event forwarder.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx.clone(), tx_rx));
    let forwarder_handle = tokio::spawn(forward_events(settlement_rx, alert_rx, shutdown_rx));

    let app_state = AppState {
        gateway,
        store,
        addresses,
        ledger,
        webhooks,
        stats,
        config: Arc::new(runtime),
    };
    let router = build_router(app_state);

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop background tasks.
    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;
    let _ = forwarder_handle.await;

    tracing::info!("Server shutdown complete");
    result.map_err(Into::into)
}

/// Drain settlement and alert events into structured logs.
///
/// The bot-notification and dashboard layers are external; this is
/// their attachment point, and until they attach, every event is at
/// least visible in the logs.
async fn forward_events(
    mut settlement_rx: SettlementEventReceiver,
    mut alert_rx: AlertEventReceiver,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            Some(event) = settlement_rx.recv() => {
                tracing::info!(target: "slotpay::settlement", ?event, "settlement event");
            }

            Some(alert) = alert_rx.recv() => {
                tracing::warn!(target: "slotpay::alert", ?alert, "operational alert");
            }

            else => break,
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
