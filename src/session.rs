//! Session: one agent connection plus its tasks and event queues
//! (`spec.md` §3, §4.2) and the Session Manager that owns the pool of
//! them (`spec.md` §4.3). Adapted from the teacher's `session.rs`
//! (`SessionManager`/`Session` over a jailed agent process), generalized
//! from "one sandbox process per session" to "one conversational agent
//! connection per session", and extended with the Event Bus integration
//! and the idle-reaper contract `spec.md` requires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{AgentConnection, AgentConnector, AgentOptions};
use crate::bus::{EventBus, EventPublisher, EventReceiver};
use crate::error::{BusError, SessionError};
use crate::event::Event;

/// `spec.md` §3: Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Terminated,
}

struct QueueSlot {
    publisher: EventPublisher,
    receiver: Option<EventReceiver>,
}

struct SessionInner {
    /// Task ids owned by this session, insertion order preserved.
    tasks: Vec<String>,
    queues: HashMap<String, QueueSlot>,
    last_activity: DateTime<Utc>,
    status: SessionStatus,
}

/// One live agent connection plus the metadata of tasks running over it.
pub struct Session {
    pub session_id: String,
    pub workspace: PathBuf,
    pub options: AgentOptions,
    pub created_at: DateTime<Utc>,
    agent: Box<dyn AgentConnection>,
    bus: EventBus,
    inner: AsyncMutex<SessionInner>,
}

impl Session {
    fn new(
        session_id: String,
        workspace: PathBuf,
        options: AgentOptions,
        agent: Box<dyn AgentConnection>,
        queue_capacity: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            workspace,
            options,
            created_at: now,
            agent,
            bus: EventBus::new(queue_capacity),
            inner: AsyncMutex::new(SessionInner {
                tasks: Vec::new(),
                queues: HashMap::new(),
                last_activity: now,
                status: SessionStatus::Active,
            }),
        }
    }

    /// The agent connection bound to this session.
    pub fn agent(&self) -> &dyn AgentConnection {
        self.agent.as_ref()
    }

    /// Add a task to the session.
    ///
    /// `spec.md` §5: "the design assumes one task per session at a time";
    /// a second task on an already-busy session is rejected with
    /// `SessionBusy`.
    pub async fn add_task(&self, task_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if !inner.tasks.is_empty() {
            return Err(SessionError::SessionBusy(self.session_id.clone()));
        }
        inner.tasks.push(task_id.to_string());
        inner.last_activity = Utc::now();
        Ok(())
    }

    /// Remove a task from the session (idempotent). Leaves any event queue
    /// untouched: a subscriber may still be draining the task's terminal
    /// event after the executor has finished.
    pub async fn remove_task(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.tasks.retain(|t| t != task_id);
        inner.last_activity = Utc::now();
    }

    /// Subscribe to a task's event queue.
    ///
    /// Lazily creates the queue on first touch. A second concurrent
    /// subscribe for the same task id (before the first unsubscribes)
    /// fails with [`BusError::AlreadySubscribed`].
    pub async fn subscribe(&self, task_id: &str) -> Result<EventReceiver, BusError> {
        let mut inner = self.inner.lock().await;
        let slot = inner.queues.entry(task_id.to_string()).or_insert_with(|| {
            let (publisher, receiver) = self.bus.create();
            QueueSlot {
                publisher,
                receiver: Some(receiver),
            }
        });
        slot.receiver
            .take()
            .ok_or_else(|| BusError::AlreadySubscribed(task_id.to_string()))
    }

    /// Drop a task's queue. Further publishes for that task id become
    /// silent no-ops.
    pub async fn unsubscribe(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.queues.remove(task_id);
    }

    /// Publish an event for a task. A no-op if no queue exists (the task
    /// was never subscribed, or already unsubscribed).
    pub async fn publish(&self, task_id: &str, event: Event) {
        let sender = {
            let mut inner = self.inner.lock().await;
            inner.last_activity = Utc::now();
            inner.queues.get(task_id).map(|slot| slot.publisher.clone())
        };
        if let Some(publisher) = sender {
            publisher.publish(event).await;
        }
    }

    /// `len(tasks) == 0 && now - last_activity > timeout`.
    pub async fn is_idle(&self, timeout: Duration) -> bool {
        let inner = self.inner.lock().await;
        if !inner.tasks.is_empty() {
            return false;
        }
        let elapsed = Utc::now().signed_duration_since(inner.last_activity);
        elapsed.to_std().map(|d| d > timeout).unwrap_or(false)
    }

    pub async fn to_info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        SessionInfo {
            session_id: self.session_id.clone(),
            tasks: inner.tasks.clone(),
            status: inner.status,
            created_at: self.created_at,
            last_activity: inner.last_activity,
        }
    }

    async fn mark_terminated(&self) {
        self.inner.lock().await.status = SessionStatus::Terminated;
    }
}

/// `spec.md` §6: `GET /api/v1/sessions` element.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub tasks: Vec<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Tunables for the Session Manager (`spec.md` §6 `session` config group).
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_concurrent: usize,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
    /// `spec.md` §6 `task.max_queue_size`: the Event Bus's bounded capacity.
    pub event_queue_capacity: usize,
}

/// Bounded pool of live agent connections with idle reaping
/// (`spec.md` §4.3).
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    connector: Arc<dyn AgentConnector>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn AgentConnector>, config: SessionManagerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            config,
        }
    }

    /// Create a new session. Opens the agent connection before inserting
    /// into the table; a failed connect leaves the table unchanged.
    ///
    /// The whole operation (existence check, capacity check, connect,
    /// insert) runs under the manager's write lock, so concurrent creates
    /// of the same id are serialized: the first wins, the second gets
    /// `AlreadyExists`.
    pub async fn create_session(
        &self,
        session_id: &str,
        workspace: &Path,
        options: AgentOptions,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists(session_id.to_string()));
        }
        if sessions.len() >= self.config.max_concurrent {
            return Err(SessionError::AtCapacity(self.config.max_concurrent));
        }
        if !workspace.exists() {
            return Err(SessionError::InvalidWorkspace(
                workspace.display().to_string(),
            ));
        }

        let agent = self
            .connector
            .connect(&options)
            .await
            .map_err(SessionError::ConnectFailed)?;

        let session = Arc::new(Session::new(
            session_id.to_string(),
            workspace.to_path_buf(),
            options,
            agent,
            self.config.event_queue_capacity,
        ));

        info!(session = %session_id, total = sessions.len() + 1, "created session");
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            infos.push(session.to_info().await);
        }
        infos
    }

    pub async fn get_active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Disconnect the agent and remove the session from the table.
    /// Disconnect errors are logged, never propagated.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        drop(sessions);

        session.mark_terminated().await;
        if let Err(e) = session.agent().disconnect().await {
            warn!(session = %session_id, error = %e, "error disconnecting session");
        }
        Ok(())
    }

    /// One reaper sweep: select all idle sessions, disconnect and remove
    /// them. Both the idle check and the removal happen under the same
    /// write-lock hold, so a session cannot reacquire a task in between
    /// (`spec.md` §4.3, §8.4).
    pub async fn reap_idle(&self) {
        let mut sessions = self.sessions.write().await;
        let mut idle_ids = Vec::new();
        for (id, session) in sessions.iter() {
            if session.is_idle(self.config.idle_timeout).await {
                idle_ids.push(id.clone());
            }
        }
        if idle_ids.is_empty() {
            return;
        }
        for id in &idle_ids {
            if let Some(session) = sessions.remove(id) {
                session.mark_terminated().await;
                if let Err(e) = session.agent().disconnect().await {
                    warn!(session = %id, error = %e, "error disconnecting reaped session");
                }
                debug!(session = %id, "reaped idle session");
            }
        }
        info!(count = idle_ids.len(), "reaper swept idle sessions");
    }

    /// Disconnect and drop every session (server shutdown).
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (id, session) in sessions.drain() {
            session.mark_terminated().await;
            if let Err(e) = session.agent().disconnect().await {
                warn!(session = %id, error = %e, "error disconnecting session during shutdown");
            }
        }
    }

    /// Start the background reaper task.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                manager.reap_idle().await;
            }
        })
    }
}
