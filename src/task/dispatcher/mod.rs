mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::error::ServiceError;
use crate::pipeline::{TransformOptions, TransformPipeline};
use crate::task::registry::TaskRegistry;
use worker::TaskWorker;

/// A staged input file owned by the job that carries it. The file is removed
/// when the guard drops, which covers every worker exit path: success,
/// pipeline failure, timeout, and jobs dropped before processing.
#[derive(Debug)]
pub struct StagedInput {
    path: PathBuf,
}

impl StagedInput {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged input {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged input {:?}: {}", self.path, e),
        }
    }
}

/// One unit of queued work.
#[derive(Debug)]
pub struct DispatchJob {
    pub task_id: String,
    pub input: StagedInput,
    pub options: TransformOptions,
}

/// Settings the dispatcher needs from the configuration surface.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub worker_concurrency: usize,
    pub task_timeout: Duration,
}

/// Feeds queued jobs to a fixed set of workers. The queue itself is
/// unbounded and strictly FIFO; the concurrency ceiling is the number of
/// workers pulling from it, default 1.
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<DispatchJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        artifacts: Arc<ArtifactStore>,
        pipeline: Arc<dyn TransformPipeline>,
        settings: DispatcherSettings,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let (shutdown_tx, _) = watch::channel(false);

        let concurrency = settings.worker_concurrency.max(1);
        info!("Starting {} dispatch worker(s)", concurrency);

        let mut workers = Vec::with_capacity(concurrency);
        for index in 0..concurrency {
            let worker = TaskWorker::new(
                index,
                registry.clone(),
                artifacts.clone(),
                pipeline.clone(),
                queue_rx.clone(),
                settings.task_timeout,
            );
            let stop = shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move {
                worker.run(stop).await;
            }));
        }

        Self {
            queue: queue_tx,
            workers: Mutex::new(workers),
            shutdown: shutdown_tx,
        }
    }

    /// Enqueues work and returns immediately. Excess submissions wait in FIFO
    /// order behind the worker ceiling.
    pub fn submit(&self, job: DispatchJob) -> Result<(), ServiceError> {
        if *self.shutdown.borrow() {
            return Err(ServiceError::Internal("dispatcher is shut down".into()));
        }
        self.queue
            .send(job)
            .map_err(|_| ServiceError::Internal("dispatch queue is closed".into()))
    }

    /// Stops the workers: each finishes its in-flight transform within the
    /// grace period or is aborted.
    pub async fn shutdown(&self, grace: Duration) {
        if self.shutdown.send(true).is_err() {
            return;
        }

        let mut workers = self.workers.lock().await;
        for mut handle in workers.drain(..) {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Worker did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }
        info!("Dispatcher stopped");
    }
}
