//! Monsoonfire studio daemon: binds the API listener and serves the
//! reservation, commerce, and library surfaces.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mf_gateway::{build_router, ApiState};
use mf_guard::ShutdownSignal;
use mf_store::DocStore;

mod environment;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    mf_telemetry::logging::init_logging("mf-daemon", "info");
    info!("monsoonfire daemon starting");

    let config = environment::Config::load().context("failed to load configuration")?;
    let cooldown = environment::cooldown_policy();

    let store_path = config.store_path();
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let store = Arc::new(
        DocStore::open(&store_path)
            .await
            .with_context(|| format!("failed to open store at {}", store_path.display()))?,
    );
    info!(path = %store_path.display(), "document store ready");

    let state = Arc::new(
        ApiState::new(store, config.station_registry())
            .with_cooldown(cooldown)
            .with_rollout_phase(config.rollout_phase()),
    );
    let router = build_router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "API listener bound");

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        signal.trigger();
    });

    let graceful = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { graceful.wait().await })
        .await
        .context("server error")?;

    info!("monsoonfire daemon stopped");
    Ok(())
}
