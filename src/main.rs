#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use transcribe_rs::{
    artifact::ArtifactStore,
    cleanup::CleanupScheduler,
    config::Config,
    limit::SubmissionLimiter,
    pipeline::AudioExtractPipeline,
    task::{Dispatcher, DispatcherSettings, TaskRegistry},
    utils::logger,
    web, AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let _guard = logger::init(config.log_dir.clone())?;

    info!("Starting transcription service...");
    fs::create_dir_all(&config.upload_dir)?;
    fs::create_dir_all(&config.audio_dir)?;

    let registry = Arc::new(TaskRegistry::new());
    let artifacts = Arc::new(ArtifactStore::new());
    let pipeline = Arc::new(AudioExtractPipeline::new(config.audio_dir.clone()));

    info!("Initializing dispatcher...");
    let dispatcher = Dispatcher::new(
        registry.clone(),
        artifacts.clone(),
        pipeline,
        DispatcherSettings {
            worker_concurrency: config.worker_concurrency,
            task_timeout: config.task_timeout,
        },
    );

    let limiter = SubmissionLimiter::new(config.rate_limit_per_minute);

    // one stop signal shared by the server, the cleanup loop and ctrl-c
    let (stop_tx, stop_rx) = watch::channel(false);

    info!("Starting cleanup scheduler...");
    let cleanup = CleanupScheduler::new(
        registry.clone(),
        artifacts.clone(),
        vec![config.upload_dir.clone(), config.audio_dir.clone()],
        config.cleanup_interval,
        config.retention,
    )
    .spawn(stop_rx.clone());

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        registry,
        artifacts,
        dispatcher,
        limiter,
    });

    {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        });
    }

    match web::start_server(ctx.clone(), config.listen_addr, stop_rx).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    info!("Shutting down...");
    let _ = stop_tx.send(true);
    ctx.dispatcher.shutdown(config.shutdown_grace).await;
    if let Err(e) = cleanup.await {
        error!("Cleanup task ended abnormally: {}", e);
    }
    ctx.artifacts.purge_all().await;
    info!("Shutdown complete");

    Ok(())
}
