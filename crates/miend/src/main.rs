use std::sync::Arc;

use anyhow::{Context, Result};
use mien_core::{ArcFaceEmbedder, FaceStore};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let cfg = config::Config::from_env();

    // Fail fast: a missing model aborts startup, never a request.
    let model_path = cfg.arcface_model_path();
    let embedder = ArcFaceEmbedder::load(&model_path)
        .with_context(|| format!("loading ArcFace model from {model_path}"))?;
    let engine = engine::spawn_engine(Box::new(embedder));

    if let Some(dir) = &cfg.audit_image_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating audit image dir {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "audit crop persistence enabled");
    }

    let store = Arc::new(FaceStore::new());
    let service = service::RecognitionService::new(
        store,
        engine,
        cfg.unknown_distance_threshold,
        cfg.audit_image_dir.clone(),
    );

    let _conn = zbus::connection::Builder::system()?
        .name("org.freedesktop.Mien1")?
        .serve_at(
            "/org/freedesktop/Mien1",
            dbus_interface::MienService::new(service),
        )?
        .build()
        .await
        .context("registering on the system bus")?;

    tracing::info!(
        threshold = ?cfg.unknown_distance_threshold,
        "miend ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");

    Ok(())
}
