//! Internal event channels between the network-facing listeners and the
//! processing logic.
//!
//! # Event flow
//!
//! 1. The ledger subscription poller emits `LedgerEvent` -> `LedgerWatcher`
//! 2. Collaborators emit `SubscribeRequest` -> `StreamListener` (buffered
//!    while disconnected, replayed on reconnect)
//!
//! Viewer-facing events travel over the broker's pub/sub channels instead
//! (see `cache`); these mpsc channels are strictly in-process plumbing, so
//! backpressure and shutdown ordering stay explicit.

pub mod channels;
pub mod types;

pub use channels::{
    ledger_event_channel, subscribe_request_channel, LedgerEventReceiver, LedgerEventSender,
    SubscribeRequestReceiver, SubscribeRequestSender, DEFAULT_CHANNEL_BUFFER,
};
pub use types::{LedgerEvent, SubscribeRequest};
