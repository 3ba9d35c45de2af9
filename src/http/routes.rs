//! REST handlers (`spec.md` §6).

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SharedState;
use crate::agent::AgentOptions;
use crate::error::ApiError;
use crate::event::{TaskProgress, TaskResult};
use crate::executor;
use crate::registry::TaskStatus;
use crate::session::SessionInfo;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_sessions: usize,
    active_tasks: usize,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.sessions.get_active_count().await,
        active_tasks: state.registry.count_active().await,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn ready(State(state): State<SharedState>) -> Result<(), ApiError> {
    let active = state.sessions.get_active_count().await;
    if active < state.sessions.max_concurrent() {
        Ok(())
    } else {
        Err(ApiError::AtCapacity)
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_id: String,
    pub prompt: String,
    pub workspace: PathBuf,
    #[serde(default)]
    pub options: Option<AgentOptions>,
    #[serde(default)]
    pub session: Option<SessionRef>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRef {
    pub session_id: String,
    #[serde(default)]
    pub reuse_existing: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub stream_url: String,
    pub created_at: DateTime<Utc>,
}

/// `POST /api/v1/tasks`.
pub async fn submit_task(
    State(state): State<SharedState>,
    Json(body): Json<SubmitTaskRequest>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    if body.task_id.is_empty() || body.prompt.is_empty() {
        return Err(ApiError::BadRequest(
            "task_id and prompt are required".to_string(),
        ));
    }

    let session = match &body.session {
        Some(SessionRef {
            session_id,
            reuse_existing: true,
        }) => state
            .sessions
            .get_session(session_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("session '{session_id}' not found")))?,
        _ => {
            let session_id = format!("session-{}", body.task_id);
            state
                .sessions
                .create_session(
                    &session_id,
                    &body.workspace,
                    body.options.unwrap_or_default(),
                )
                .await?
        }
    };

    session.add_task(&body.task_id).await?;
    state
        .registry
        .register(&body.task_id, &session.session_id)
        .await;

    let timeout = body
        .timeout_seconds
        .map(std::time::Duration::from_secs)
        .unwrap_or(state.config.task.default_timeout);

    tokio::spawn(executor::run_task(
        Arc::clone(&session),
        Arc::clone(&state.registry),
        body.task_id.clone(),
        body.prompt,
        timeout,
    ));

    let record = state.registry.get(&body.task_id).await.expect("just registered");
    Ok(Json(SubmitTaskResponse {
        task_id: body.task_id.clone(),
        session_id: session.session_id.clone(),
        status: record.status,
        stream_url: format!("/stream/tasks/{}", body.task_id),
        created_at: record.created_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `GET /api/v1/tasks/{task_id}`.
pub async fn get_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let record = state
        .registry
        .get(&task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id}' not found")))?;

    Ok(Json(TaskStatusResponse {
        task_id: record.task_id,
        session_id: record.session_id,
        status: record.status,
        progress: record.progress,
        result: record.result,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct InterruptResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub interrupted_at: DateTime<Utc>,
}

/// `POST /api/v1/tasks/{task_id}/interrupt`.
pub async fn interrupt_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<InterruptResponse>, ApiError> {
    let record = state
        .registry
        .get(&task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id}' not found")))?;

    let session = state
        .sessions
        .get_session(&record.session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("session '{}' not found", record.session_id)))?;

    session
        .agent()
        .interrupt()
        .await
        .map_err(ApiError::Internal)?;
    state.registry.mark_interrupted(&task_id).await;

    Ok(Json(InterruptResponse {
        task_id,
        status: TaskStatus::Interrupted,
        interrupted_at: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

/// `GET /api/v1/sessions`.
pub async fn list_sessions(State(state): State<SharedState>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse {
        sessions: state.sessions.list_sessions().await,
    })
}

/// `DELETE /api/v1/sessions/{session_id}`.
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<(), ApiError> {
    state.sessions.delete_session(&session_id).await?;
    Ok(())
}
