//! The typed event union emitted by the executor onto a task's queue
//! (`spec.md` §3: Event, TaskProgress).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value snapshot of a task's progress.
///
/// Monotonic in `turns` and `elapsed_time_ms`; `tokens_*` are overwritten
/// (not accumulated) once the authoritative totals arrive in the agent's
/// terminal result message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskProgress {
    pub turns: u64,
    pub tokens_used: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub files_modified: u64,
    pub elapsed_time_ms: u64,
}

/// The final outcome of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub exit_code: i32,
    pub summary: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Populated only if the agent connection reports a cost; the built-in
    /// `AgentConnection` implementations leave this `None` (see
    /// `SPEC_FULL.md` §3).
    pub total_cost_usd: Option<f64>,
}

/// The sub-kind of a [`Event::Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePayload {
    AssistantText { content: String, model: String },
    Thinking { content: String, signature: String },
    User { content: String },
    System {
        subtype: String,
        data: serde_json::Value,
    },
}

/// A typed record emitted by the executor onto a task's event queue.
///
/// Every event carries a UTC timestamp. For each task, at most one terminal
/// event (`Complete` or a final `Error`) is ever emitted, and it is always
/// the last event delivered (`spec.md` §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: MessagePayload,
    },
    ToolUse {
        timestamp: DateTime<Utc>,
        tool_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        timestamp: DateTime<Utc>,
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Progress {
        timestamp: DateTime<Utc>,
        progress: TaskProgress,
    },
    Complete {
        timestamp: DateTime<Utc>,
        result: TaskResult,
    },
    Error {
        timestamp: DateTime<Utc>,
        message: String,
    },
}

impl Event {
    /// Whether this is a terminal event (`spec.md` §3/§8.1).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}
