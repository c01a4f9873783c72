//! Axum server setup and router configuration.

use crate::api::campaigns::{
    campaign_feed, campaign_leaderboard, create_campaign, get_campaign, global_feed,
    global_leaderboard,
};
use crate::api::donations::{get_donation, get_donor};
use crate::api::health::health_check;
use crate::api::ws::viewer_ws;
use crate::state::AppState;
use crate::shutdown::shutdown_signal;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(viewer_ws))
        .route("/campaigns", post(create_campaign))
        .route("/campaigns/{id}", get(get_campaign))
        .route("/campaigns/{id}/leaderboard", get(campaign_leaderboard))
        .route("/campaigns/{id}/feed", get(campaign_feed))
        .route("/leaderboard", get(global_leaderboard))
        .route("/feed", get(global_feed))
        .route("/donations/{tx_hash}", get(get_donation))
        .route("/donors/{address}", get(get_donor))
        .with_state(state)
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
