//! Shared health state.
//!
//! Connection and reconciliation state live in explicit structs owned by
//! their component and shared read-only with the health endpoint through
//! `Arc<RwLock<..>>` handles; there is no ambient global state.

use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Live state of the push-stream connection.
///
/// Owned by the stream listener for the process lifetime; rebuilt on every
/// reconnect.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
    /// Set when the reconnect budget is exhausted; a standing degraded
    /// condition surfaced on the health endpoint.
    pub gave_up: bool,
    pub last_error: Option<String>,
    /// Streams this connection should be (and, when connected, is)
    /// subscribed to. Requests received while disconnected accumulate here
    /// and are replayed on reconnect.
    pub subscribed: BTreeSet<String>,
}

/// Shared handle to the stream listener's connection state.
pub type SharedConnectionState = Arc<RwLock<ConnectionState>>;

pub fn shared_connection_state() -> SharedConnectionState {
    Arc::new(RwLock::new(ConnectionState::default()))
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileOutcome {
    #[serde(with = "time::serde::rfc3339")]
    pub ran_at: OffsetDateTime,
    pub scanned: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub orphaned: u64,
    pub errors: u64,
}

/// Shared handle to the most recent reconciliation outcome.
pub type SharedReconcileOutcome = Arc<RwLock<Option<ReconcileOutcome>>>;

pub fn shared_reconcile_outcome() -> SharedReconcileOutcome {
    Arc::new(RwLock::new(None))
}
