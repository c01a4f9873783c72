//! `GET /health` — operational snapshot of the whole pipeline.

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use gvp_core::entities::{Donation, DonationStatus};
use gvp_core::health::ReconcileOutcome;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    stream: StreamHealth,
    donations: DonationCounts,
    last_reconcile: Option<ReconcileOutcome>,
    hub_connections: usize,
    /// Best-effort ledger probe; `null` when the node is unreachable.
    ledger_block_height: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamHealth {
    connected: bool,
    reconnect_attempts: u32,
    gave_up: bool,
    last_error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DonationCounts {
    pending: Option<i64>,
    orphaned: Option<i64>,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let connection = state.connection.read().await.clone();
    let last_reconcile = state.reconcile.read().await.clone();

    let pending = count_or_log(&state, DonationStatus::Pending).await;
    let orphaned = count_or_log(&state, DonationStatus::Orphaned).await;

    let ledger_block_height = match state.ledger.block_height().await {
        Ok(height) => Some(height),
        Err(e) => {
            tracing::debug!(error = %e, "Ledger height probe failed");
            None
        }
    };

    let degraded = connection.gave_up || pending.is_none() || orphaned.is_none();

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        stream: StreamHealth {
            connected: connection.connected,
            reconnect_attempts: connection.reconnect_attempts,
            gave_up: connection.gave_up,
            last_error: connection.last_error,
        },
        donations: DonationCounts { pending, orphaned },
        last_reconcile,
        hub_connections: state.hub.connections(),
        ledger_block_height,
    })
}

async fn count_or_log(state: &AppState, status: DonationStatus) -> Option<i64> {
    match Donation::count_by_status(&state.db, status).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::error!(error = %e, "Failed to count donations for health check");
            None
        }
    }
}
