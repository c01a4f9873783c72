//! GivePulse Server
//!
//! Reconciliation-and-fan-out service for a donation platform: ingests
//! donations from a push stream and the settlement ledger, reconciles the
//! two, and fans live updates out to viewer WebSocket connections.

mod api;
mod config;
mod relay;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{get_database_url, ConfigLoader};
use gvp_core::cache::CacheStore;
use gvp_core::events::{ledger_event_channel, subscribe_request_channel};
use gvp_core::health::{shared_connection_state, shared_reconcile_outcome};
use gvp_core::ledger::{JsonRpcLedgerClient, LedgerClient, LedgerSubscription};
use gvp_core::processors::{AggregateUpdater, LedgerWatcher, Reconciler, StreamListener};
use relay::EventRelay;
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::{AppState, HubRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// GivePulse - donation reconciliation and fan-out service
#[derive(Parser, Debug)]
#[command(name = "gvp-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./gvp-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting gvp-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let cache = CacheStore::connect(
        &config.cache.redis_url,
        Some(&config.cache.key_prefix),
        config.cache.feed_cap,
        config.cache.token_decimals,
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to connect to redis: {}", e);
        e
    })?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(JsonRpcLedgerClient::new(
        config.ledger.rpc_url.clone(),
        config.ledger.contract_address.clone(),
        config.ledger.request_timeout,
    )?);

    // Internal plumbing: shutdown flag, event channels, shared health state.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ledger_tx, ledger_rx) = ledger_event_channel();
    let (subscribe_tx, subscribe_rx) = subscribe_request_channel();
    let connection = shared_connection_state();
    let reconcile = shared_reconcile_outcome();
    let (broadcast_tx, _) = broadcast::channel(256);

    let aggregates = AggregateUpdater::new(db_pool.clone(), cache.clone());

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        StreamListener::new(
            db_pool.clone(),
            cache.clone(),
            config.stream,
            connection.clone(),
            subscribe_rx,
            shutdown_rx.clone(),
        )
        .run(),
    ));
    tasks.push(tokio::spawn(
        LedgerSubscription::new(
            ledger.clone(),
            ledger_tx,
            config.ledger.poll_interval,
            shutdown_rx.clone(),
        )
        .run(),
    ));
    tasks.push(tokio::spawn(
        LedgerWatcher::new(
            db_pool.clone(),
            cache.clone(),
            aggregates.clone(),
            ledger_rx,
            shutdown_rx.clone(),
        )
        .run(),
    ));
    tasks.push(tokio::spawn(
        Reconciler::new(
            db_pool.clone(),
            ledger.clone(),
            aggregates,
            config.reconciler,
            reconcile.clone(),
            shutdown_rx.clone(),
        )
        .run(),
    ));
    tasks.push(tokio::spawn(
        EventRelay::new(cache.clone(), broadcast_tx.clone(), shutdown_rx.clone()).run(),
    ));

    let app_state = AppState {
        db: db_pool.clone(),
        cache,
        ledger,
        broadcast_tx,
        subscribe_tx,
        connection,
        reconcile,
        hub: Arc::new(HubRegistry::default()),
        ws: config.ws,
        campaign_ttl_secs: config.cache.campaign_ttl_secs,
    };

    let router = build_router(app_state);

    tracing::info!("Starting HTTP server on {}", config.listen);
    let result = run_server(router, config.listen).await;

    // Stop the processors and wait for them to drain.
    tracing::info!("Stopping background tasks...");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
