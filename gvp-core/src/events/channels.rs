//! Event channel factories and handles.

use super::types::{LedgerEvent, SubscribeRequest};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// Enough to absorb bursts while keeping memory bounded; senders suspend
/// when a processor falls this far behind.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for LedgerEvent events.
pub type LedgerEventSender = mpsc::Sender<LedgerEvent>;
/// Receiver handle for LedgerEvent events.
pub type LedgerEventReceiver = mpsc::Receiver<LedgerEvent>;

/// Sender handle for SubscribeRequest events.
pub type SubscribeRequestSender = mpsc::Sender<SubscribeRequest>;
/// Receiver handle for SubscribeRequest events.
pub type SubscribeRequestReceiver = mpsc::Receiver<SubscribeRequest>;

/// Create a new LedgerEvent channel.
pub fn ledger_event_channel() -> (LedgerEventSender, LedgerEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new SubscribeRequest channel.
pub fn subscribe_request_channel() -> (SubscribeRequestSender, SubscribeRequestReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
