use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod watch;

use config::{BusKind, Config};
use dbus_interface::{IdentifyService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("facewatchd starting");

    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    // Model loading and gallery embedding are CPU-bound and synchronous.
    let engine_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || engine::start(&engine_config))
        .await
        .context("engine startup task panicked")?
        .context("failed to start identification engine")?;

    let running = Arc::new(AtomicBool::new(true));
    let watcher = if config.watch {
        Some(watch::spawn(&config, engine.clone(), Arc::clone(&running)).context("failed to spawn watch thread")?)
    } else {
        tracing::info!("live watch disabled via FACEWATCH_WATCH=0");
        None
    };

    let service = IdentifyService {
        engine,
        started: Instant::now(),
        watching: config.watch,
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");

    running.store(false, Ordering::Relaxed);
    if let Some(handle) = watcher {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }

    Ok(())
}
