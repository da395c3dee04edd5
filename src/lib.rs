//! Reelforge - durable, priority-laned video transcoding pipeline.
//!
//! The library side of the binary: it assembles a [`Pipeline`] from a
//! [`Config`] and runs it until a shutdown signal arrives. The pipeline
//! itself lives in `rf-pipeline`.

use std::sync::Arc;
use std::time::Duration;

use rf_av::{FfmpegEngine, FfprobeExtractor, LocalStorage, ToolRegistry};
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_core::Result;
use rf_db::pool::DbPool;
use rf_pipeline::{Collaborators, Pipeline, PipelineSettings};
use tokio_util::sync::CancellationToken;

/// Open (or create) the database named by the config.
pub fn open_database(config: &Config) -> Result<DbPool> {
    let db_path = &config.database.path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let db = rf_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }
    Ok(db)
}

/// Discover ffmpeg/ffprobe and open storage.
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let tools = ToolRegistry::discover(&config.engine);
    for info in tools.check_all() {
        if info.available {
            tracing::debug!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let engine = Arc::new(FfmpegEngine::from_registry(
        &tools,
        Duration::from_secs(config.engine.job_timeout_secs),
    )?);
    let extractor = Arc::new(FfprobeExtractor::new(tools.require("ffprobe")?.to_path_buf()));
    let storage = Arc::new(LocalStorage::open(&config.storage.root)?);

    Ok(Collaborators {
        engine: engine.clone(),
        extractor,
        thumbnails: engine,
        storage,
    })
}

/// Build a pipeline over the configured database and tools, without
/// starting any background task.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let db = open_database(config)?;
    let collab = build_collaborators(config)?;
    let settings = PipelineSettings::from_config(config);
    Ok(Pipeline::new(db, collab, Arc::new(EventBus::default()), &settings))
}

/// Run the pipeline until SIGINT/SIGTERM.
///
/// Jobs left running by a previous process are recovered before workers
/// start. On shutdown, in-flight jobs get a grace period to finish.
pub async fn start(config: Config) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let pipeline = build_pipeline(&config)?;
    let (requeued, failed) = pipeline.recover()?;
    if requeued + failed > 0 {
        tracing::info!(requeued, failed, "Recovered jobs from previous run");
    }

    let cancel = CancellationToken::new();
    let handles = pipeline.spawn(&cancel);
    tracing::info!(tasks = handles.len(), "Pipeline started");

    shutdown_signal(cancel.clone()).await;
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Pipeline task panicked");
        }
    }
    tracing::info!("Pipeline shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or for `cancel`.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
