//! Error types for each layer, and their HTTP surfacing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("at capacity: {0} concurrent sessions")]
    AtCapacity(usize),

    #[error("workspace does not exist: {0}")]
    InvalidWorkspace(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("failed to connect agent: {0}")]
    ConnectFailed(#[source] anyhow::Error),

    #[error("session '{0}' is busy with another task")]
    SessionBusy(String),
}

/// Errors raised by the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("task '{0}' already has a subscriber")]
    AlreadySubscribed(String),
}

/// Top-level error type surfaced by the HTTP/stream façade.
///
/// Maps domain errors onto the status codes `spec.md` §7 assigns them.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("at capacity")]
    AtCapacity,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("agent unavailable: {0}")]
    AgentUnavailable(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyExists(id) => {
                Self::BadRequest(format!("session '{id}' already exists"))
            }
            SessionError::AtCapacity(_) => Self::AtCapacity,
            SessionError::InvalidWorkspace(path) => {
                Self::BadRequest(format!("workspace does not exist: {path}"))
            }
            SessionError::NotFound(id) => Self::NotFound(format!("session '{id}' not found")),
            SessionError::ConnectFailed(e) => Self::AgentUnavailable(e),
            SessionError::SessionBusy(id) => {
                Self::BadRequest(format!("session '{id}' is busy with another task"))
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(self, Self::Internal(_) | Self::AgentUnavailable(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
