//! The daemon: serves the HTTP API and periodically replays the outbox.

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use deadhand_core::{Clock, SystemClock};
use deadhand_index::{QuerySurface, SqliteStore};
use deadhand_ledger::GraphqlReader;
use deadhand_reconcile::{Outbox, Reconciler};
use std::sync::Arc;
use std::time::Duration;

/// Open the index, outbox and ledger reader described by `config`.
pub fn build_engine(config: &ServerConfig) -> Result<Arc<Reconciler>> {
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data dir: {}",
            config.server.data_dir.display()
        )
    })?;

    let store = SqliteStore::open(config.index_path())
        .with_context(|| format!("Failed to open index at {}", config.index_path().display()))?;
    let outbox = Outbox::open(config.outbox_path()).with_context(|| {
        format!(
            "Failed to load outbox from {}",
            config.outbox_path().display()
        )
    })?;
    let ledger = GraphqlReader::new(&config.ledger.graphql_url, config.confirm_timeout())
        .context("Failed to create ledger client")?;

    let engine = Reconciler::new(Arc::new(store), Arc::new(ledger), Arc::new(SystemClock))
        .with_retry(config.retry.clone())
        .with_outbox(outbox);
    Ok(Arc::new(engine))
}

/// Run the daemon. Blocks until the listener fails or shutdown.
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("deadhand server starting…");
    log::info!("  Listen:     {}", config.server.listen_addr);
    log::info!("  Data dir:   {}", config.server.data_dir.display());
    log::info!("  Ledger:     {}", config.ledger.graphql_url);
    log::info!(
        "  Replay:     every {} seconds",
        config.server.replay_interval_secs
    );
    if config.server.debug {
        log::warn!("Debug mode: error responses include internal detail");
    }

    let engine = build_engine(&config)?;
    let clock: Arc<dyn Clock> = engine.clock().clone();
    let state = AppState {
        engine: engine.clone(),
        query: Arc::new(QuerySurface::new(engine.store().clone())),
        clock,
        debug: config.server.debug,
    };

    let interval = Duration::from_secs(config.server.replay_interval_secs);
    tokio::spawn(replay_loop(engine, interval));

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("Listening on http://{}", addr);

    axum::serve(listener, api::router(state))
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn replay_loop(engine: Arc<Reconciler>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if engine.outbox().is_empty() {
            continue;
        }
        match engine.replay_pending().await {
            Ok(report) => log::info!(
                "Outbox replay: {} applied, {} dropped, {} remaining",
                report.applied,
                report.dropped,
                report.remaining
            ),
            Err(e) => log::error!("Outbox replay failed: {}", e),
        }
    }
}

/// Replay the outbox once and exit.
pub async fn run_replay_cycle(config: &ServerConfig) -> Result<()> {
    let engine = build_engine(config)?;
    let pending = engine.outbox().len();
    log::info!("Replaying {} queued event(s)…", pending);

    let report = engine
        .replay_pending()
        .await
        .context("Failed to update outbox")?;
    log::info!(
        "Replay finished: {} applied, {} dropped, {} remaining",
        report.applied,
        report.dropped,
        report.remaining
    );
    anyhow::ensure!(
        report.remaining == 0,
        "{} event(s) still queued",
        report.remaining
    );
    Ok(())
}
