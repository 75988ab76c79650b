use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::task::TaskRegistry;
use crate::utils::fs::sweep_stale_files;

/// Periodic retention sweep over task records, artifacts, and the staging
/// directories. Runs independently of request traffic; every individual
/// failure is logged and skipped so the loop itself never dies.
pub struct CleanupScheduler {
    registry: Arc<TaskRegistry>,
    artifacts: Arc<ArtifactStore>,
    staging_dirs: Vec<PathBuf>,
    sweep_interval: Duration,
    retention: Duration,
}

impl CleanupScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        artifacts: Arc<ArtifactStore>,
        staging_dirs: Vec<PathBuf>,
        sweep_interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            registry,
            artifacts,
            staging_dirs,
            sweep_interval,
            retention,
        }
    }

    /// Starts the sweep loop. It ticks until the stop signal flips, then the
    /// handle resolves; join it on shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so a fresh start
            // does not sweep an empty service
            ticker.tick().await;

            info!(
                "Cleanup scheduler running every {}s, retention {}s",
                self.sweep_interval.as_secs(),
                self.retention.as_secs()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep().await,
                    _ = shutdown.changed() => break,
                }
            }
            info!("Cleanup scheduler stopped");
        })
    }

    /// One pass: expire tasks, expire artifacts, then sweep staging
    /// directories for files nobody tracks anymore (crashed workers can
    /// leave partial files behind).
    pub async fn sweep(&self) {
        let expired_tasks = self.registry.expire_older_than(self.retention).await;
        let expired_artifacts = self.artifacts.expire(self.retention).await;
        debug!(
            "Sweep removed {} task(s), {} artifact(s)",
            expired_tasks, expired_artifacts
        );

        for dir in &self.staging_dirs {
            match sweep_stale_files(dir, self.retention) {
                Ok(0) => {}
                Ok(count) => info!("Swept {} stale file(s) from {:?}", count, dir),
                Err(e) => warn!("Failed to sweep {:?}: {}", dir, e),
            }
        }
    }
}
