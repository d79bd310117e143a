use anyhow::{Context, Result};
use rollcall_core::{AttendanceLedger, Gallery, OnnxEmbedder};
use rollcall_hw::V4lBackend;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod pipeline;
mod snapshot;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env().context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let mut embedder = OnnxEmbedder::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;

    let gallery = Gallery::load(&config.gallery_path, &mut embedder)
        .with_context(|| format!("failed to load gallery {}", config.gallery_path.display()))?;
    if gallery.is_empty() {
        tracing::warn!("gallery is empty; every face will be reported as unknown");
    }

    let ledger = AttendanceLedger::open(&config.ledger_path, config.ledger_scope)
        .context("failed to open attendance ledger")?;
    tracing::info!(
        path = %ledger.path().display(),
        scope = ?ledger.scope(),
        "attendance ledger ready"
    );

    let handle = pipeline::spawn_pipeline(
        Box::new(V4lBackend),
        Box::new(embedder),
        Arc::new(gallery),
        ledger.clone(),
        pipeline::PipelineSettings::from(&config),
    )?;

    let service = dbus_interface::AttendanceService::new(handle.clone(), ledger);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    if config.autostart {
        match handle.start().await {
            Ok(state) => tracing::info!(%state, "autostart"),
            Err(e) => tracing::warn!(error = %e, "autostart failed; waiting for Start"),
        }
    }

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    if let Err(e) = handle.stop().await {
        tracing::warn!(error = %e, "pipeline did not stop cleanly");
    }

    Ok(())
}
