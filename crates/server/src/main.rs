//! Sync service binary.
//!
//! Standalone HTTP service for finding/issue synchronization.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracker_sync::store::{InMemoryFindingStore, InMemoryLinkStore, InMemoryNoteStore};
use tracker_sync::{
    InMemoryConfigStore, NoteSynchronizer, PullEngine, PushEngine, SyncScheduler,
};

use sync_server::{build_router, poller, AppState, Config, EngineExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sync_server=info".parse()?))
        .init();

    info!("Starting sync service...");

    // Load configuration
    let config = Config::default();

    if !config.enabled {
        warn!("SYNC_ENABLED is not set to true. Service will not process webhooks.");
    }

    // Stores: in-memory wiring; durable persistence plugs in behind the
    // same traits.
    let configs = Arc::new(InMemoryConfigStore::new());
    let findings = Arc::new(InMemoryFindingStore::new());
    let links = Arc::new(InMemoryLinkStore::new());
    let notes = Arc::new(InMemoryNoteStore::new());

    // Engines and the executor behind the scheduler
    let executor = Arc::new(EngineExecutor::new(
        configs.clone(),
        findings.clone(),
        links.clone(),
        PushEngine::new(links.clone()),
        PullEngine::new(findings.clone(), links.clone()),
        NoteSynchronizer::new(notes.clone()),
    ));
    let scheduler = SyncScheduler::new(executor, links.clone(), config.scheduler_config());

    let state = AppState {
        config: config.clone(),
        configs,
        findings,
        links,
        notes: Arc::new(NoteSynchronizer::new(notes)),
        scheduler,
    };

    // Poll fallback for trackers without webhook delivery
    if let Some(interval_secs) = config.poll_interval_secs {
        info!(interval_secs = interval_secs, "Poll mode enabled");
        tokio::spawn(poller::run_poller(state.clone(), interval_secs));
    }

    // Build router
    let app = build_router(state);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "Sync service listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
