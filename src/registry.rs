//! Process-wide task registry (`spec.md` §4.5, §5, §9).
//!
//! A single mutex-guarded table mapping `task_id -> {session_id, status,
//! progress, result, timestamps}`. The HTTP façade writes to it; every
//! reader (status queries, the stream endpoint's grace-window poll) only
//! reads. Kept as its own component with its own lifecycle rather than an
//! ambient singleton, per the teacher's pattern of passing shared state
//! through `AppState`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::event::{TaskProgress, TaskResult};

/// `spec.md` §4.4 state machine: `PENDING -> RUNNING -> {COMPLETED, FAILED,
/// INTERRUPTED}`. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Guarded by its own mutex: the façade writes, everyone reads
/// (`spec.md` §5 shared-resource policy).
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly-started task with status RUNNING.
    pub async fn register(&self, task_id: &str, session_id: &str) {
        let now = Utc::now();
        self.tasks.write().await.insert(
            task_id.to_string(),
            TaskRecord {
                task_id: task_id.to_string(),
                session_id: session_id.to_string(),
                status: TaskStatus::Running,
                progress: TaskProgress::default(),
                result: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Count of tasks not yet in a terminal state, for the health endpoint.
    pub async fn count_active(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .count()
    }

    pub async fn update_progress(&self, task_id: &str, progress: TaskProgress) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            record.progress = progress;
            record.updated_at = Utc::now();
        }
    }

    /// Mark a task INTERRUPTED. Called directly by the interrupt handler,
    /// independently of (and typically before) the executor's own
    /// terminal transition — a no-op once the task has already reached a
    /// terminal state, since terminal states are absorbing.
    pub async fn mark_interrupted(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = TaskStatus::Interrupted;
                record.updated_at = Utc::now();
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// Record the executor's terminal outcome, stamping the final progress
    /// alongside it. If the task was already marked INTERRUPTED, that
    /// status is preserved even though the executor's own exit code is a
    /// failure (`spec.md` §8.6/E4).
    pub async fn complete(&self, task_id: &str, progress: TaskProgress, result: TaskResult) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            if record.status != TaskStatus::Interrupted {
                record.status = if result.exit_code == 0 {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
            }
            record.progress = progress;
            record.result = Some(result);
            record.updated_at = Utc::now();
        }
    }
}
