//! In-memory mock [`AgentConnection`] for executor/session tests.
//!
//! Mirrors the teacher's `MockBackend` (in `mcp.rs` tests): a fixed,
//! pre-scripted response instead of a real subprocess.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use super::protocol::AgentMessage;
use super::{AgentConnection, AgentConnector, AgentOptions};

/// What the mock does when queried.
pub enum MockScript {
    /// Stream the given messages in order, then close the channel.
    Messages(Vec<AgentMessage>),
    /// Hang until interrupted, then raise a stream error (simulates E4:
    /// interrupt causes the in-flight stream to raise).
    HangUntilInterrupted,
    /// Drop the stream with an error after the given messages (simulates a
    /// connection loss mid-task).
    ErrorAfter(Vec<AgentMessage>, String),
}

/// A connection is spawned once per session and may drive several tasks in
/// turn when the session is reused, so it is queued up with one script per
/// expected `receive_response` call rather than a single consumed script.
pub struct MockAgentConnection {
    scripts: Mutex<VecDeque<MockScript>>,
    interrupted: Mutex<bool>,
    disconnected: Mutex<bool>,
    interrupt_signal: Arc<Notify>,
}

impl MockAgentConnection {
    pub fn new(script: MockScript) -> Self {
        Self::with_scripts(vec![script])
    }

    pub fn with_scripts(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            interrupted: Mutex::new(false),
            disconnected: Mutex::new(false),
            interrupt_signal: Arc::new(Notify::new()),
        }
    }

    pub async fn was_interrupted(&self) -> bool {
        *self.interrupted.lock().await
    }

    pub async fn was_disconnected(&self) -> bool {
        *self.disconnected.lock().await
    }
}

#[async_trait]
impl AgentConnection for MockAgentConnection {
    async fn query(&self, _prompt: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn receive_response(&self) -> anyhow::Result<mpsc::Receiver<anyhow::Result<AgentMessage>>> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("mock script already consumed"))?;

        let (tx, rx) = mpsc::channel(16);
        let interrupt_signal = Arc::clone(&self.interrupt_signal);
        tokio::spawn(async move {
            match script {
                MockScript::Messages(msgs) => {
                    for msg in msgs {
                        if tx.send(Ok(msg)).await.is_err() {
                            return;
                        }
                    }
                }
                MockScript::ErrorAfter(msgs, err) => {
                    for msg in msgs {
                        if tx.send(Ok(msg)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Err(anyhow::anyhow!(err))).await;
                }
                MockScript::HangUntilInterrupted => {
                    interrupt_signal.notified().await;
                    let _ = tx.send(Err(anyhow::anyhow!("interrupted"))).await;
                }
            }
        });
        Ok(rx)
    }

    async fn interrupt(&self) -> anyhow::Result<()> {
        *self.interrupted.lock().await = true;
        self.interrupt_signal.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        *self.disconnected.lock().await = true;
        Ok(())
    }
}

/// Connector that always hands out a fresh mock with the given script-queue
/// factory (since each `connect()` needs its own `MockAgentConnection`).
/// Most tests only need one script; a reused session that runs more than
/// one task needs one script per task, in call order.
pub struct MockAgentConnector<F>
where
    F: Fn() -> Vec<MockScript> + Send + Sync,
{
    pub make_scripts: F,
}

#[async_trait]
impl<F> AgentConnector for MockAgentConnector<F>
where
    F: Fn() -> Vec<MockScript> + Send + Sync,
{
    async fn connect(&self, _options: &AgentOptions) -> anyhow::Result<Box<dyn AgentConnection>> {
        Ok(Box::new(MockAgentConnection::with_scripts((self.make_scripts)())))
    }
}
