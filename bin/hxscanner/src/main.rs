//! hxscanner: indexes blocks, transactions, operations, contract receipts
//! and derived token/balance state from a chain node into PostgreSQL.
//!
//! Flow:
//! 1. Connect to PostgreSQL and apply migrations
//! 2. Open the node websocket and keep it alive
//! 3. Resume from `SCAN_FROM` or the persisted checkpoint
//! 4. Scan blocks one at a time until Ctrl-C or a fatal error
//!
//! Any error stops the process with a non-zero exit; a restart resumes from
//! the last checkpoint and replays idempotently.

use std::sync::Arc;

use eyre::Result;
use tokio_util::sync::CancellationToken;

use hxscan_core::{Settings, telemetry};
use hxscan_node::{NodeClient, NodeSource};
use hxscan_scanner::{Checkpoint, Scanner, ScannerOptions, default_pipeline};
use hxscan_storage::{self as storage, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(node = %settings.node_endpoint, "Starting hxscanner");

    let pool = storage::connect(&settings.database_url).await?;
    tracing::info!("Connected to database");

    storage::migrate(&pool).await?;
    tracing::info!("Database migrations applied");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let client = NodeClient::connect(&settings.node_endpoint).await?;
    let shutdown = CancellationToken::new();
    let keep_alive = client.spawn_keep_alive(shutdown.clone());
    let node: Arc<dyn NodeSource> = client.clone();

    // ── Scan loop ───────────────────────────────────────────────────────
    let start = Checkpoint::new(store.clone()).start_block(settings.scan_from).await?;
    let plugins = default_pipeline(node.clone(), store.clone(), &settings.caller_pubkey);
    let mut scanner = Scanner::new(node, store, plugins, ScannerOptions::from(&settings));

    let signal = shutdown.clone();
    let closer = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down gracefully…");
            signal.cancel();
            if let Err(e) = closer.close().await {
                tracing::warn!(error = %e, "Failed to close node connection");
            }
        }
    });

    let outcome = scanner.run(start, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = keep_alive.await {
        tracing::warn!(error = %e, "Keep-alive task failed");
    }
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "Failed to close node connection");
    }

    let last = outcome?;
    tracing::info!(block = last, "Scanner stopped.");
    Ok(())
}
