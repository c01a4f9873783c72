//! Long-running processors.
//!
//! - `StreamListener`: consumes the push stream, materializes provisional
//!   donations
//! - `LedgerWatcher`: consumes `LedgerEvent`s, confirms or creates
//!   donations, detects completion and withdrawals
//! - `Reconciler`: periodic sweep that settles stuck `pending` donations
//!   against the ledger directly
//! - `AggregateUpdater`: shared confirmed-donation bookkeeping used by the
//!   watcher and the reconciler

pub mod aggregates;
pub mod ledger_watcher;
pub mod reconciler;
pub mod stream_listener;

pub use aggregates::AggregateUpdater;
pub use ledger_watcher::LedgerWatcher;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use stream_listener::{StreamListener, StreamListenerConfig};
