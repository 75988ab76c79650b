use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{Task, TaskError, TaskOptions, TaskResult, TaskStatus};

/// Why a state transition was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionError {
    NotFound,
    InvalidState { from: TaskStatus },
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "task not found"),
            Self::InvalidState { from } => write!(f, "invalid transition from {}", from),
        }
    }
}

impl std::error::Error for TransitionError {}

/// Per-status counts, exposed on the health endpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory task records behind a single lock.
///
/// The only writer of a task past creation is the dispatcher worker holding
/// it; pollers take read snapshots. The lock is never held across a call into
/// another component.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a fresh Pending record and returns a snapshot of it.
    pub async fn create(&self, options: TaskOptions) -> Task {
        let task = Task {
            id: format!("task-{}", Uuid::new_v4()),
            status: TaskStatus::Pending,
            options,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };

        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        info!("Created task {}", task.id);
        task
    }

    /// Read-only snapshot; None if absent or already expired.
    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Pending -> Processing. Refused when the task is absent or no longer
    /// Pending, which guards the dispatcher against double-dispatch.
    pub async fn transition_to_processing(&self, task_id: &str) -> Result<(), TransitionError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id).ok_or(TransitionError::NotFound)?;

        if task.status != TaskStatus::Pending {
            return Err(TransitionError::InvalidState { from: task.status });
        }

        task.status = TaskStatus::Processing;
        debug!("Task {} is now processing", task_id);
        Ok(())
    }

    /// Processing -> Completed, recording the payload and completion time.
    pub async fn complete(&self, task_id: &str, result: TaskResult) -> Result<(), TransitionError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id).ok_or(TransitionError::NotFound)?;

        if task.status != TaskStatus::Processing {
            return Err(TransitionError::InvalidState { from: task.status });
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(result);
        info!("Task {} completed", task_id);
        Ok(())
    }

    /// Processing -> Failed, recording the error and completion time.
    pub async fn fail(&self, task_id: &str, error: TaskError) -> Result<(), TransitionError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id).ok_or(TransitionError::NotFound)?;

        if task.status != TaskStatus::Processing {
            return Err(TransitionError::InvalidState { from: task.status });
        }

        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        info!("Task {} failed: {} ({})", task_id, error.message, error.kind);
        task.error = Some(error);
        Ok(())
    }

    /// Removes the record unconditionally. Idempotent; used by cleanup.
    pub async fn delete(&self, task_id: &str) -> bool {
        self.tasks.write().await.remove(task_id).is_some()
    }

    /// Removes every record older than `max_age`, returning how many.
    pub async fn expire_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| task.created_at >= cutoff);
        let removed = before - tasks.len();
        if removed > 0 {
            info!("Expired {} task record(s)", removed);
        }
        removed
    }

    pub async fn stats(&self) -> RegistryStats {
        let tasks = self.tasks.read().await;
        let mut stats = RegistryStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Shifts a record's creation time into the past. Test-only hook for
    /// exercising retention sweeps without waiting out the window.
    #[cfg(test)]
    pub async fn backdate(&self, task_id: &str, by: Duration) {
        if let Some(task) = self.tasks.write().await.get_mut(task_id) {
            task.created_at = task.created_at
                - chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::hours(1));
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
