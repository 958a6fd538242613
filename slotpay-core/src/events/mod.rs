//! Typed event channels.
//!
//! The original design note applies here: services notify each other
//! through explicit typed channels, never hidden callbacks.
//!
//! # Event flow
//!
//! 1. Gateway / settlement emit [`TxEvent`] -> `TransactionMonitor` (stats)
//! 2. Settlement emits [`SettlementEvent`] -> bot-notification layer
//! 3. Processor / monitor emit [`AlertEvent`] -> admin dashboard

pub mod channels;
pub mod types;

pub use channels::{
    AlertEventReceiver, AlertEventSender, DEFAULT_CHANNEL_BUFFER, EventSenders,
    SettlementEventReceiver, SettlementEventSender, TxEventReceiver, TxEventSender,
    alert_event_channel, settlement_event_channel, tx_event_channel,
};

pub use types::{AlertEvent, SettlementEvent, TxEvent};
