//! Event channel factories and handles.

use super::types::{AlertEvent, SettlementEvent, TxEvent};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type SettlementEventSender = mpsc::Sender<SettlementEvent>;
pub type SettlementEventReceiver = mpsc::Receiver<SettlementEvent>;

pub type AlertEventSender = mpsc::Sender<AlertEvent>;
pub type AlertEventReceiver = mpsc::Receiver<AlertEvent>;

pub type TxEventSender = mpsc::Sender<TxEvent>;
pub type TxEventReceiver = mpsc::Receiver<TxEvent>;

pub fn settlement_event_channel() -> (SettlementEventSender, SettlementEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

pub fn alert_event_channel() -> (AlertEventSender, AlertEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

pub fn tx_event_channel() -> (TxEventSender, TxEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// All event senders, cloneable as one handle.
///
/// A dropped receiver is not an error for emitters (it happens during
/// shutdown and in tests), so the emit helpers log and move on.
#[derive(Clone)]
pub struct EventSenders {
    pub settlement: SettlementEventSender,
    pub alert: AlertEventSender,
    pub tx: TxEventSender,
}

impl EventSenders {
    pub fn new(
        settlement: SettlementEventSender,
        alert: AlertEventSender,
        tx: TxEventSender,
    ) -> Self {
        Self {
            settlement,
            alert,
            tx,
        }
    }

    pub async fn emit_settlement(&self, event: SettlementEvent) {
        if let Err(e) = self.settlement.send(event).await {
            tracing::warn!(error = %e, "settlement event receiver dropped");
        }
    }

    pub async fn emit_alert(&self, event: AlertEvent) {
        if let Err(e) = self.alert.send(event).await {
            tracing::warn!(error = %e, "alert event receiver dropped");
        }
    }

    pub async fn emit_tx(&self, event: TxEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::warn!(error = %e, "tx event receiver dropped");
        }
    }
}
