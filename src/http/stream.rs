//! Stream endpoint (`spec.md` §4.5, §6, E6).
//!
//! `/stream/tasks/{task_id}` upgrades to a `WebSocket` and forwards the
//! task's event queue to the client as JSON text frames, closing with
//! 1000 after `complete`, 1008 if the task never appears within the grace
//! window, 1011 on an internal error.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use super::SharedState;

/// The source polls 10x100ms; the spec redesigns this as a bounded
/// grace window of at least 1 second, schedule left to the implementer.
const GRACE_WINDOW: Duration = Duration::from_millis(1200);
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub async fn stream_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, task_id))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, task_id: String) {
    let Some(session) = wait_for_task(&state, &task_id).await else {
        close_with(
            &mut socket,
            CLOSE_POLICY_VIOLATION,
            "task not found within grace window",
        )
        .await;
        return;
    };

    let mut receiver = match session.subscribe(&task_id).await {
        Ok(rx) => rx,
        Err(e) => {
            close_with(&mut socket, CLOSE_INTERNAL_ERROR, &e.to_string()).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Some(event) => {
                        let is_terminal = event.is_terminal();
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(task_id = %task_id, error = %e, "failed to serialize event");
                                close_with(&mut socket, CLOSE_INTERNAL_ERROR, "serialization error").await;
                                session.unsubscribe(&task_id).await;
                                return;
                            }
                        }
                        if is_terminal {
                            let _ = socket
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_NORMAL,
                                    reason: "complete".into(),
                                })))
                                .await;
                            session.unsubscribe(&task_id).await;
                            return;
                        }
                    }
                    None => {
                        // Queue closed without a terminal event (e.g. the
                        // owning session was reaped mid-task).
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    debug!(task_id = %task_id, "client disconnected from stream");
                    session.unsubscribe(&task_id).await;
                    return;
                }
            }
        }
    }

    session.unsubscribe(&task_id).await;
}

/// Poll the registry for up to [`GRACE_WINDOW`] for the task to appear,
/// then resolve its owning session.
async fn wait_for_task(
    state: &SharedState,
    task_id: &str,
) -> Option<std::sync::Arc<crate::session::Session>> {
    let deadline = tokio::time::Instant::now() + GRACE_WINDOW;
    loop {
        if let Some(record) = state.registry.get(task_id).await {
            return state.sessions.get_session(&record.session_id).await;
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(GRACE_POLL_INTERVAL).await;
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Text(
            serde_json::json!({"type": "error", "message": reason}).to_string().into(),
        ))
        .await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
