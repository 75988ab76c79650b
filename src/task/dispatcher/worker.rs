use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::DispatchJob;
use crate::artifact::ArtifactStore;
use crate::pipeline::{TransformOutput, TransformPipeline};
use crate::task::registry::TaskRegistry;
use crate::task::types::{TaskError, TaskResult};

/// Pulls jobs off the shared queue and drives them through the pipeline.
/// The worker is the only writer of a task once it picks the job up, so a
/// task is never left in Processing: every branch below ends in `complete`
/// or `fail`.
pub struct TaskWorker {
    index: usize,
    registry: Arc<TaskRegistry>,
    artifacts: Arc<ArtifactStore>,
    pipeline: Arc<dyn TransformPipeline>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<DispatchJob>>>,
    task_timeout: Duration,
}

impl TaskWorker {
    pub fn new(
        index: usize,
        registry: Arc<TaskRegistry>,
        artifacts: Arc<ArtifactStore>,
        pipeline: Arc<dyn TransformPipeline>,
        queue: Arc<Mutex<mpsc::UnboundedReceiver<DispatchJob>>>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            index,
            registry,
            artifacts,
            pipeline,
            queue,
            task_timeout,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let job = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    job = queue.recv() => job,
                    _ = shutdown.changed() => None,
                }
            };

            let Some(job) = job else { break };
            self.process(job).await;

            if *shutdown.borrow() {
                break;
            }
        }
        debug!("Worker {} stopped", self.index);
    }

    async fn process(&self, job: DispatchJob) {
        let DispatchJob {
            task_id,
            input,
            options,
        } = job;

        if let Err(e) = self.registry.transition_to_processing(&task_id).await {
            // duplicate submission or a record the cleanup already took;
            // not this worker's problem
            debug!("Dropping job for {}: {}", task_id, e);
            return;
        }

        info!("Worker {} processing task {}", self.index, task_id);
        let outcome = timeout(
            self.task_timeout,
            self.pipeline.transform(input.path(), &options),
        )
        .await;

        let transition = match outcome {
            Err(_) => {
                warn!(
                    "Task {} exceeded its {}s budget",
                    task_id,
                    self.task_timeout.as_secs()
                );
                self.registry
                    .fail(&task_id, TaskError::timeout(self.task_timeout))
                    .await
            }
            Ok(Err(e)) => {
                error!("Pipeline failed for task {}: {:#}", task_id, e);
                self.registry
                    .fail(&task_id, TaskError::pipeline(format!("{:#}", e)))
                    .await
            }
            Ok(Ok(output)) => match self.register_output(&task_id, output).await {
                Ok(result) => self.registry.complete(&task_id, result).await,
                Err(task_error) => self.registry.fail(&task_id, task_error).await,
            },
        };

        if let Err(e) = transition {
            // the record can vanish mid-flight if a retention sweep took it
            warn!("Could not record outcome for task {}: {}", task_id, e);
        }
        // `input` drops here, removing the staged upload on every path
    }

    async fn register_output(
        &self,
        task_id: &str,
        output: TransformOutput,
    ) -> Result<TaskResult, TaskError> {
        let mut result = TaskResult {
            text: output.text,
            language: output.detected_language,
            duration_secs: output.duration_secs,
            artifact_id: None,
        };

        if let Some(path) = output.artifact {
            match self
                .artifacts
                .register(path.clone(), output.media_kind, task_id)
                .await
            {
                Ok(artifact_id) => result.artifact_id = Some(artifact_id),
                Err(e) => {
                    // failing the task without the file would leak it
                    if let Err(remove_err) = std::fs::remove_file(&path) {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            warn!("Failed to remove output {:?}: {}", path, remove_err);
                        }
                    }
                    return Err(TaskError::internal(e));
                }
            }
        }

        Ok(result)
    }
}
