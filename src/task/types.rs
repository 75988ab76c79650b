use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// One submitted unit of work, tracked from submission to expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub options: TaskOptions,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Caller-supplied options. Opaque to the lifecycle core; the language hint is
/// forwarded to the pipeline, the original filename only names the download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    pub language: Option<String>,
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Success payload recorded on a completed task. Inline transcript data plus a
/// reference to the downloadable artifact, if the transform produced one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub text: Option<String>,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
    pub artifact_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    Pipeline,
    Timeout,
    Internal,
}

impl Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Failure recorded on a task. Kept separate from `TaskResult` so a terminal
/// task carries exactly one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn pipeline(message: impl Display) -> Self {
        Self {
            kind: TaskErrorKind::Pipeline,
            message: message.to_string(),
        }
    }

    pub fn timeout(budget: Duration) -> Self {
        Self {
            kind: TaskErrorKind::Timeout,
            message: format!("transform exceeded {}s budget", budget.as_secs()),
        }
    }

    pub fn internal(message: impl Display) -> Self {
        Self {
            kind: TaskErrorKind::Internal,
            message: message.to_string(),
        }
    }
}
