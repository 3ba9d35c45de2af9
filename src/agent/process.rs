//! Process-backed agent connection.
//!
//! Spawns the agent as a child process and speaks the length-prefixed JSON
//! protocol in [`super::protocol`] over its stdin/stdout. Adapted from the
//! teacher's `StdioPipeTransport`: the agent process is spawned once and
//! kept alive for the session's lifetime; requests and the response stream
//! share the same pipes, so sending is mutex-guarded while reading is
//! handed off to a dedicated task.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::protocol::{recv_message, send_message, AgentMessage};
use super::{AgentConnection, AgentConnector, AgentOptions};

/// Control requests the daemon sends to the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentRequest {
    Query { prompt: String },
    Interrupt,
    Shutdown,
}

/// Connects to the agent by spawning `exec_path` as a child process.
pub struct ProcessAgentConnector {
    pub exec_path: String,
    pub ready_timeout: Duration,
}

#[async_trait]
impl AgentConnector for ProcessAgentConnector {
    async fn connect(&self, options: &AgentOptions) -> anyhow::Result<Box<dyn AgentConnection>> {
        let conn =
            ProcessAgentConnection::spawn(&self.exec_path, self.ready_timeout, options).await?;
        Ok(Box::new(conn))
    }
}

pub struct ProcessAgentConnection {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    /// Re-locked (not taken) on every `receive_response` call, matching the
    /// teacher's `StdioPipeTransport`: the reader task holds the guard for
    /// the duration of one response stream, then releases it for the next.
    stdout: Arc<Mutex<ChildStdout>>,
    alive: AtomicBool,
}

impl ProcessAgentConnection {
    /// Spawn the agent process and wait for its `Ready` message.
    pub async fn spawn(
        exec_path: &str,
        ready_timeout: Duration,
        options: &AgentOptions,
    ) -> anyhow::Result<Self> {
        debug!(exec = %exec_path, "spawning agent process");

        let mut cmd = tokio::process::Command::new(exec_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn agent '{exec_path}': {e}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to take agent stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to take agent stdout"))?;

        let ready_bytes = tokio::time::timeout(ready_timeout, recv_message(&mut stdout))
            .await
            .map_err(|_| anyhow::anyhow!("agent did not become ready within {ready_timeout:?}"))?
            .map_err(|e| anyhow::anyhow!("failed to read agent ready message: {e}"))?;

        anyhow::ensure!(
            ready_bytes == b"ready",
            "expected agent ready handshake, got {} bytes",
            ready_bytes.len()
        );

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Arc::new(Mutex::new(stdout)),
            alive: AtomicBool::new(true),
        })
    }

    async fn send_request(&self, req: &AgentRequest) -> anyhow::Result<()> {
        anyhow::ensure!(self.alive.load(Ordering::Relaxed), "agent is not alive");
        let mut stdin = self.stdin.lock().await;
        let bytes = serde_json::to_vec(req)?;
        send_message(&mut *stdin, &bytes).await
    }
}

#[async_trait]
impl AgentConnection for ProcessAgentConnection {
    async fn query(&self, prompt: &str) -> anyhow::Result<()> {
        self.send_request(&AgentRequest::Query {
            prompt: prompt.to_string(),
        })
        .await
    }

    async fn receive_response(&self) -> anyhow::Result<mpsc::Receiver<anyhow::Result<AgentMessage>>> {
        let stdout = Arc::clone(&self.stdout);

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            // Held for the lifetime of this one response stream, then
            // dropped, so a subsequent call can re-lock for the next task
            // run on the same (reused) connection.
            let mut stdout = stdout.lock().await;
            loop {
                match recv_message(&mut *stdout).await {
                    Ok(bytes) => match serde_json::from_slice::<AgentMessage>(&bytes) {
                        Ok(msg) => {
                            let is_terminal = matches!(msg, AgentMessage::Result { .. });
                            if tx.send(Ok(msg)).await.is_err() {
                                return;
                            }
                            if is_terminal {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(anyhow::anyhow!("malformed agent message: {e}")))
                                .await;
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = tx.send(Err(anyhow::anyhow!("agent stream ended: {e}"))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn interrupt(&self) -> anyhow::Result<()> {
        self.send_request(&AgentRequest::Interrupt).await
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        if !self.alive.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        if let Err(e) = self.send_request(&AgentRequest::Shutdown).await {
            warn!(error = %e, "graceful agent shutdown failed, killing process");
        }

        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        let _ = child.wait().await;
        Ok(())
    }
}
