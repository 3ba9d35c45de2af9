//! HTTP / Stream Façade (`spec.md` §4.5, §6).
//!
//! Owns the process-wide task registry and session manager, assembles the
//! axum router, and exposes everything handlers need through [`AppState`].

pub mod auth;
pub mod routes;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::AgentConnector;
use crate::config::Config;
use crate::registry::TaskRegistry;
use crate::session::{SessionManager, SessionManagerConfig};

/// Shared state reachable from every handler.
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<TaskRegistry>,
    pub config: Config,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

pub fn build_state(config: Config, connector: Arc<dyn AgentConnector>) -> SharedState {
    let sessions = Arc::new(SessionManager::new(
        connector,
        SessionManagerConfig {
            max_concurrent: config.session.max_concurrent,
            idle_timeout: config.session.idle_timeout,
            cleanup_interval: config.session.cleanup_interval,
            event_queue_capacity: config.task.max_queue_size,
        },
    ));
    Arc::new(AppState {
        sessions,
        registry: Arc::new(TaskRegistry::new()),
        config,
        started_at: Instant::now(),
    })
}

/// Assemble the router: REST endpoints, the stream endpoint, and the
/// shared middleware stack (auth, CORS, request tracing).
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/v1/tasks", post(routes::submit_task))
        .route("/api/v1/tasks/{task_id}", get(routes::get_task))
        .route(
            "/api/v1/tasks/{task_id}/interrupt",
            post(routes::interrupt_task),
        )
        .route("/api/v1/sessions", get(routes::list_sessions))
        .route("/api/v1/sessions/{session_id}", delete(routes::delete_session))
        .route("/stream/tasks/{task_id}", get(stream::stream_task))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
