//! Application state shared across all request handlers.

use crate::config::WsSettings;
use gvp_core::cache::CacheStore;
use gvp_core::events::SubscribeRequestSender;
use gvp_core::health::{SharedConnectionState, SharedReconcileOutcome};
use gvp_core::ledger::LedgerClient;
use gvp_sdk::objects::BroadcastEvent;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Tracks live viewer WebSocket connections for the health surface.
#[derive(Default)]
pub struct HubRegistry {
    connections: AtomicUsize,
}

impl HubRegistry {
    pub fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Redis cache/broker handle.
    pub cache: CacheStore,
    /// Settlement ledger client, for the health block-height probe.
    pub ledger: Arc<dyn LedgerClient>,
    /// Relayed broadcast events, fanned out to every viewer connection.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Subscribe requests routed to the stream listener on campaign
    /// creation.
    pub subscribe_tx: SubscribeRequestSender,
    /// Push-stream connection health, owned by the stream listener.
    pub connection: SharedConnectionState,
    /// Most recent reconciliation sweep outcome.
    pub reconcile: SharedReconcileOutcome,
    /// Viewer connection registry.
    pub hub: Arc<HubRegistry>,
    /// Viewer WebSocket keep-alive settings.
    pub ws: WsSettings,
    /// TTL of the cached campaign view.
    pub campaign_ttl_secs: u64,
}
