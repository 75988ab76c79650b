use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::sleep;
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::pipeline::{TransformOptions, TransformOutput, TransformPipeline};
use crate::task::{
    DispatchJob, Dispatcher, DispatcherSettings, StagedInput, Task, TaskErrorKind, TaskOptions,
    TaskRegistry, TaskStatus,
};

enum Behavior {
    Succeed,
    SucceedWithArtifact { payload: &'static [u8] },
    Fail(&'static str),
}

/// Stand-in transform. Staged inputs are named `<task_id>.mp4` so the
/// pipeline can tell which task it is serving and record dispatch order.
struct TestPipeline {
    behavior: Behavior,
    delay: Duration,
    output_dir: PathBuf,
    registry: Arc<TaskRegistry>,
    calls: AtomicUsize,
    // (task id, were all previously started tasks terminal when this one began)
    started: Mutex<Vec<(String, bool)>>,
}

impl TestPipeline {
    fn new(
        behavior: Behavior,
        delay: Duration,
        output_dir: PathBuf,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            behavior,
            delay,
            output_dir,
            registry,
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    fn started_order(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn prior_always_terminal(&self) -> bool {
        self.started.lock().unwrap().iter().all(|(_, ok)| *ok)
    }
}

#[async_trait]
impl TransformPipeline for TestPipeline {
    async fn transform(&self, input: &Path, _options: &TransformOptions) -> Result<TransformOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let task_id = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let prior: Vec<String> = self.started_order();
        let mut all_terminal = true;
        for id in &prior {
            match self.registry.get(id).await {
                Some(task) if task.is_terminal() => {}
                _ => all_terminal = false,
            }
        }
        self.started
            .lock()
            .unwrap()
            .push((task_id.clone(), all_terminal));

        sleep(self.delay).await;

        match &self.behavior {
            Behavior::Succeed => Ok(TransformOutput {
                text: Some(format!("transcript for {}", task_id)),
                detected_language: Some("en".into()),
                duration_secs: Some(2.0),
                artifact: None,
                media_kind: "audio",
            }),
            Behavior::SucceedWithArtifact { payload } => {
                let path = self.output_dir.join(format!("{}.mp3", Uuid::new_v4()));
                std::fs::write(&path, payload)?;
                Ok(TransformOutput {
                    text: None,
                    detected_language: None,
                    duration_secs: Some(2.0),
                    artifact: Some(path),
                    media_kind: "audio",
                })
            }
            Behavior::Fail(message) => Err(anyhow!(*message)),
        }
    }
}

struct TestEnv {
    registry: Arc<TaskRegistry>,
    artifacts: Arc<ArtifactStore>,
    dispatcher: Dispatcher,
    pipeline: Arc<TestPipeline>,
    staging: TempDir,
    _output: TempDir,
}

fn setup(behavior: Behavior, delay: Duration, task_timeout: Duration) -> TestEnv {
    let staging = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let registry = Arc::new(TaskRegistry::new());
    let artifacts = Arc::new(ArtifactStore::new());
    let pipeline = Arc::new(TestPipeline::new(
        behavior,
        delay,
        output.path().to_path_buf(),
        registry.clone(),
    ));
    let dispatcher = Dispatcher::new(
        registry.clone(),
        artifacts.clone(),
        pipeline.clone(),
        DispatcherSettings {
            worker_concurrency: 1,
            task_timeout,
        },
    );
    TestEnv {
        registry,
        artifacts,
        dispatcher,
        pipeline,
        staging,
        _output: output,
    }
}

impl TestEnv {
    /// Creates a task and enqueues it with a staged dummy upload.
    async fn submit_task(&self) -> (Task, PathBuf) {
        let task = self.registry.create(TaskOptions::default()).await;
        let input_path = self.staging.path().join(format!("{}.mp4", task.id));
        std::fs::write(&input_path, b"not really a video").unwrap();
        self.dispatcher
            .submit(DispatchJob {
                task_id: task.id.clone(),
                input: StagedInput::new(input_path.clone()),
                options: TransformOptions::default(),
            })
            .unwrap();
        (task, input_path)
    }

    async fn wait_terminal(&self, task_id: &str) -> Task {
        for _ in 0..500 {
            if let Some(task) = self.registry.get(task_id).await {
                if task.is_terminal() {
                    return task;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not reach a terminal state", task_id);
    }
}

#[tokio::test]
async fn test_lifecycle_completes_and_hands_off_artifact() {
    let payload: &[u8] = b"fake mp3 payload of a known length";
    let env = setup(
        Behavior::SucceedWithArtifact { payload },
        Duration::from_millis(20),
        Duration::from_secs(5),
    );

    let (task, input_path) = env.submit_task().await;
    assert_eq!(task.status, TaskStatus::Pending);

    let done = env.wait_terminal(&task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.error.is_none());

    let result = done.result.unwrap();
    let artifact_id = result.artifact_id.unwrap();

    // the download returns exactly what the pipeline produced, once
    let consumed = env.artifacts.consume(&artifact_id).await.unwrap();
    let bytes = std::fs::read(consumed.path()).unwrap();
    assert_eq!(bytes.len(), payload.len());
    drop(consumed);

    assert!(env.artifacts.consume(&artifact_id).await.is_none());

    // the staged upload is gone as soon as the worker is done with it
    sleep(Duration::from_millis(50)).await;
    assert!(!input_path.exists());
}

#[tokio::test]
async fn test_fifo_order_with_concurrency_one() {
    let env = setup(
        Behavior::Succeed,
        Duration::from_millis(30),
        Duration::from_secs(5),
    );

    let mut submitted = Vec::new();
    for _ in 0..4 {
        let (task, _) = env.submit_task().await;
        submitted.push(task.id);
    }

    for id in &submitted {
        let done = env.wait_terminal(id).await;
        assert_eq!(done.status, TaskStatus::Completed);
    }

    assert_eq!(env.pipeline.started_order(), submitted);
    // task k never started before task k-1 reached a terminal state
    assert!(env.pipeline.prior_always_terminal());
}

#[tokio::test]
async fn test_timeout_fails_task_with_timeout_kind() {
    let env = setup(
        Behavior::Succeed,
        Duration::from_secs(30),
        Duration::from_millis(50),
    );

    let (task, input_path) = env.submit_task().await;
    let done = env.wait_terminal(&task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.result.is_none());
    assert_eq!(done.error.unwrap().kind, TaskErrorKind::Timeout);

    // no artifact is registered for a timed-out run
    assert!(env.artifacts.is_empty().await);

    sleep(Duration::from_millis(50)).await;
    assert!(!input_path.exists());
}

#[tokio::test]
async fn test_pipeline_error_is_recorded_on_task() {
    let env = setup(
        Behavior::Fail("codec not supported"),
        Duration::from_millis(10),
        Duration::from_secs(5),
    );

    let (task, input_path) = env.submit_task().await;
    let done = env.wait_terminal(&task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.kind, TaskErrorKind::Pipeline);
    assert!(error.message.contains("codec not supported"));

    sleep(Duration::from_millis(50)).await;
    assert!(!input_path.exists());
}

#[tokio::test]
async fn test_duplicate_submission_is_dropped_silently() {
    let env = setup(
        Behavior::Succeed,
        Duration::from_millis(10),
        Duration::from_secs(5),
    );

    let (task, _) = env.submit_task().await;

    // second job for the same id; its staged input must still be released
    let dup_path = env.staging.path().join("duplicate.bin");
    std::fs::write(&dup_path, b"duplicate").unwrap();
    env.dispatcher
        .submit(DispatchJob {
            task_id: task.id.clone(),
            input: StagedInput::new(dup_path.clone()),
            options: TransformOptions::default(),
        })
        .unwrap();

    let done = env.wait_terminal(&task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);

    // give the worker time to pull and drop the duplicate
    sleep(Duration::from_millis(100)).await;
    assert_eq!(env.pipeline.calls.load(Ordering::SeqCst), 1);
    assert!(!dup_path.exists());
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let env = setup(
        Behavior::Succeed,
        Duration::from_millis(10),
        Duration::from_secs(5),
    );

    env.dispatcher.shutdown(Duration::from_secs(1)).await;

    let task = env.registry.create(TaskOptions::default()).await;
    let input_path = env.staging.path().join(format!("{}.mp4", task.id));
    std::fs::write(&input_path, b"late").unwrap();

    let result = env.dispatcher.submit(DispatchJob {
        task_id: task.id,
        input: StagedInput::new(input_path),
        options: TransformOptions::default(),
    });
    assert!(result.is_err());
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_work_finish() {
    let env = setup(
        Behavior::Succeed,
        Duration::from_millis(100),
        Duration::from_secs(5),
    );

    let (task, _) = env.submit_task().await;
    // let the worker pick the job up before stopping
    sleep(Duration::from_millis(30)).await;
    env.dispatcher.shutdown(Duration::from_secs(5)).await;

    let done = env.registry.get(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}
