//! Agent Adapter (external collaborator, `spec.md` §6).
//!
//! Wraps the backend conversational agent behind a connect/query/receive
//! /interrupt/disconnect capability. The concrete backend (an Anthropic
//! Agent SDK-style process, an HTTP API, whatever) is out of scope; this
//! module defines the trait the rest of the server programs against plus
//! one concrete implementation (`ProcessAgentConnection`, a jailed/child
//! process speaking the length-prefixed JSON protocol in [`protocol`]) and,
//! for tests, an in-memory mock.

pub mod process;
pub mod protocol;

#[cfg(test)]
pub mod mock;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

pub use protocol::AgentMessage;

/// Options controlling how the agent executes a session's turns.
///
/// Mirrors `ClaudeAgentOptions` in the original source and the
/// `TaskOptions`/`SessionConfig` request bodies in `spec.md` §6.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentOptions {
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_allowed_tools() -> Vec<String> {
    vec![
        "Read".to_string(),
        "Write".to_string(),
        "Edit".to_string(),
        "Bash".to_string(),
    ]
}

fn default_permission_mode() -> String {
    "acceptEdits".to_string()
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            permission_mode: default_permission_mode(),
            max_turns: None,
            model: None,
            cwd: None,
            env: Vec::new(),
        }
    }
}

/// A stateful connection to the agent backend.
///
/// One connection is bound to exactly one [`crate::session::Session`] for
/// its lifetime (`spec.md` §3 invariant: at most one agent connection per
/// session).
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Send a user prompt. Non-blocking: the response arrives via
    /// [`AgentConnection::receive_response`].
    async fn query(&self, prompt: &str) -> anyhow::Result<()>;

    /// Open the incremental response stream for the most recent query.
    ///
    /// The returned receiver yields messages until the stream produces a
    /// `Result` message (terminal) or the channel closes (stream error /
    /// disconnect).
    async fn receive_response(&self) -> anyhow::Result<mpsc::Receiver<anyhow::Result<AgentMessage>>>;

    /// Best-effort cancellation of the in-flight query.
    async fn interrupt(&self) -> anyhow::Result<()>;

    /// Idempotent teardown.
    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Connects a fresh [`AgentConnection`] for a session.
///
/// Implemented by whatever knows how to reach the agent backend (spawn a
/// process, dial an HTTP API, ...). Kept separate from `AgentConnection`
/// itself so the session manager can hold a `dyn AgentConnector` and
/// produce connections without needing to be generic over the concrete
/// backend type.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, options: &AgentOptions) -> anyhow::Result<Box<dyn AgentConnection>>;
}
