//! Task Executor: drives one task from prompt to terminal event
//! (`spec.md` §4.4). Adapted from the original `task_executor.py`'s
//! message-classification loop, rebuilt around the typed
//! [`AgentMessage`]/[`ContentBlock`] union instead of isinstance checks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::agent::protocol::{AgentMessage, ContentBlock};
use crate::event::{Event, MessagePayload, TaskProgress, TaskResult};
use crate::registry::TaskRegistry;
use crate::session::Session;

/// Substrings that count a tool result as a file modification. Verbatim
/// from the source; heuristic and wording-dependent (`spec.md` §9).
const FILE_MODIFIED_MARKERS: [&str; 2] = ["written successfully", "modified"];

fn looks_like_file_modification(text: &str) -> bool {
    let lower = text.to_lowercase();
    FILE_MODIFIED_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Run a task to completion, publishing events as it goes, and recording
/// progress/result in the shared task registry. Always removes the task
/// from its owning session before returning, on every exit path.
#[instrument(skip(session, registry, prompt), fields(task_id = %task_id))]
pub async fn run_task(
    session: Arc<Session>,
    registry: Arc<TaskRegistry>,
    task_id: String,
    prompt: String,
    timeout: Duration,
) {
    info!("starting task execution");
    let start = Instant::now();
    let mut progress = TaskProgress::default();

    let outcome = tokio::time::timeout(
        timeout,
        drive(&session, &registry, &task_id, &prompt, start, &mut progress),
    )
    .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(error = %e, "task failed");
            session
                .publish(
                    &task_id,
                    Event::Error {
                        timestamp: Utc::now(),
                        message: e.to_string(),
                    },
                )
                .await;
            TaskResult {
                exit_code: 1,
                summary: Some(format!("task failed: {e}")),
                errors: vec![e.to_string()],
                total_cost_usd: None,
            }
        }
        Err(_elapsed) => {
            error!(timeout = ?timeout, "task timed out");
            session
                .publish(
                    &task_id,
                    Event::Error {
                        timestamp: Utc::now(),
                        message: "task execution timed out".to_string(),
                    },
                )
                .await;
            TaskResult {
                exit_code: 1,
                summary: Some("task timed out".to_string()),
                errors: vec!["Timeout".to_string()],
                total_cost_usd: None,
            }
        }
    };

    session
        .publish(
            &task_id,
            Event::Complete {
                timestamp: Utc::now(),
                result: result.clone(),
            },
        )
        .await;
    registry.complete(&task_id, progress, result).await;

    session.remove_task(&task_id).await;
    info!("task execution finished");
}

/// Submit the prompt and drain the agent's response stream, classifying
/// each message and publishing the corresponding events. Returns the
/// final `TaskResult` once a `Result` message closes the stream, or an
/// error if the agent query fails, the stream raises, or it ends without
/// ever producing a `Result` message.
async fn drive(
    session: &Session,
    registry: &TaskRegistry,
    task_id: &str,
    prompt: &str,
    start: Instant,
    progress: &mut TaskProgress,
) -> anyhow::Result<TaskResult> {
    session.agent().query(prompt).await?;

    let mut stream = session.agent().receive_response().await?;

    while let Some(item) = stream.recv().await {
        let message = item?;

        match message {
            AgentMessage::Assistant { content, model } => {
                progress.turns += 1;
                for block in content {
                    handle_content_block(session, task_id, &model, block, progress).await;
                }
                progress.elapsed_time_ms = start.elapsed().as_millis() as u64;
                session
                    .publish(
                        task_id,
                        Event::Progress {
                            timestamp: Utc::now(),
                            progress: progress.clone(),
                        },
                    )
                    .await;
                registry.update_progress(task_id, progress.clone()).await;
            }
            AgentMessage::User { content } => {
                session
                    .publish(
                        task_id,
                        Event::Message {
                            timestamp: Utc::now(),
                            payload: MessagePayload::User {
                                content: content.as_text(),
                            },
                        },
                    )
                    .await;
            }
            AgentMessage::System { subtype, data } => {
                session
                    .publish(
                        task_id,
                        Event::Message {
                            timestamp: Utc::now(),
                            payload: MessagePayload::System { subtype, data },
                        },
                    )
                    .await;
            }
            AgentMessage::Result {
                usage,
                num_turns,
                duration_ms,
                is_error,
                total_cost_usd,
            } => {
                progress.tokens_used = usage.total_tokens;
                progress.tokens_input = usage.input_tokens;
                progress.tokens_output = usage.output_tokens;
                progress.turns = num_turns;
                progress.elapsed_time_ms = duration_ms;

                session
                    .publish(
                        task_id,
                        Event::Progress {
                            timestamp: Utc::now(),
                            progress: progress.clone(),
                        },
                    )
                    .await;
                registry.update_progress(task_id, progress.clone()).await;

                if is_error {
                    warn!("agent reported an error in its terminal result");
                }

                return Ok(TaskResult {
                    exit_code: 0,
                    summary: Some("task completed successfully".to_string()),
                    errors: vec![],
                    total_cost_usd,
                });
            }
        }
    }

    anyhow::bail!("agent stream ended without a result message")
}

async fn handle_content_block(
    session: &Session,
    task_id: &str,
    model: &str,
    block: ContentBlock,
    progress: &mut TaskProgress,
) {
    match block {
        ContentBlock::Text { text } => {
            session
                .publish(
                    task_id,
                    Event::Message {
                        timestamp: Utc::now(),
                        payload: MessagePayload::AssistantText {
                            content: text,
                            model: model.to_string(),
                        },
                    },
                )
                .await;
        }
        ContentBlock::Thinking { thinking, signature } => {
            session
                .publish(
                    task_id,
                    Event::Message {
                        timestamp: Utc::now(),
                        payload: MessagePayload::Thinking {
                            content: thinking,
                            signature,
                        },
                    },
                )
                .await;
        }
        ContentBlock::ToolUse { id, name, input } => {
            session
                .publish(
                    task_id,
                    Event::ToolUse {
                        timestamp: Utc::now(),
                        tool_id: id,
                        tool_name: name,
                        input,
                    },
                )
                .await;
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let text = content.as_text();
            if looks_like_file_modification(&text) {
                progress.files_modified += 1;
            }
            session
                .publish(
                    task_id,
                    Event::ToolResult {
                        timestamp: Utc::now(),
                        tool_use_id,
                        content: text,
                        is_error,
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{MockAgentConnector, MockScript};
    use crate::agent::AgentOptions;
    use crate::session::{SessionManager, SessionManagerConfig};
    use std::collections::HashMap;

    async fn new_session(script: MockScript) -> (Arc<SessionManager>, Arc<Session>) {
        new_session_with_scripts(vec![script]).await
    }

    /// One script per `receive_response` call the test expects, in order —
    /// needed for a session that is reused across more than one task.
    async fn new_session_with_scripts(scripts: Vec<MockScript>) -> (Arc<SessionManager>, Arc<Session>) {
        let scripts = Arc::new(std::sync::Mutex::new(Some(scripts)));
        let connector = Arc::new(MockAgentConnector {
            make_scripts: move || scripts.lock().unwrap().take().expect("scripts used once"),
        });
        let manager = Arc::new(SessionManager::new(
            connector,
            SessionManagerConfig {
                max_concurrent: 10,
                idle_timeout: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(60),
                event_queue_capacity: 32,
            },
        ));
        let workspace = std::env::temp_dir();
        let session = manager
            .create_session("s1", &workspace, AgentOptions::default())
            .await
            .unwrap();
        (manager, session)
    }

    async fn drain(mut rx: crate::bus::EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn happy_path_emits_text_progress_then_complete() {
        let (_mgr, session) = new_session(MockScript::Messages(vec![
            AgentMessage::Assistant {
                content: vec![ContentBlock::Text {
                    text: "hi".to_string(),
                }],
                model: "test-model".to_string(),
            },
            AgentMessage::Result {
                usage: crate::agent::protocol::Usage {
                    total_tokens: 10,
                    input_tokens: 6,
                    output_tokens: 4,
                },
                num_turns: 1,
                duration_ms: 50,
                is_error: false,
                total_cost_usd: None,
            },
        ]))
        .await;

        session.add_task("t1").await.unwrap();
        let rx = session.subscribe("t1").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t1", "s1").await;

        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t1".to_string(),
            "echo hi".to_string(),
            Duration::from_secs(5),
        )
        .await;

        let events = drain(rx).await;
        assert!(matches!(
            &events[0],
            Event::Message {
                payload: MessagePayload::AssistantText { content, .. },
                ..
            } if content == "hi"
        ));
        assert!(matches!(&events[1], Event::Progress { progress, .. } if progress.turns == 1));
        assert!(matches!(
            events.last().unwrap(),
            Event::Complete { result, .. } if result.exit_code == 0
        ));

        let record = registry.get("t1").await.unwrap();
        assert_eq!(record.status, crate::registry::TaskStatus::Completed);
    }

    #[tokio::test]
    async fn tool_cycle_increments_files_modified() {
        let mut block = HashMap::new();
        block.insert("type".to_string(), serde_json::json!("text"));
        block.insert(
            "text".to_string(),
            serde_json::json!("File written successfully"),
        );

        let (_mgr, session) = new_session(MockScript::Messages(vec![
            AgentMessage::Assistant {
                content: vec![
                    ContentBlock::ToolUse {
                        id: "u".to_string(),
                        name: "Write".to_string(),
                        input: serde_json::json!({"path": "a"}),
                    },
                    ContentBlock::ToolResult {
                        tool_use_id: "u".to_string(),
                        content: crate::agent::protocol::ToolResultContent::Blocks(vec![block]),
                        is_error: false,
                    },
                ],
                model: "test-model".to_string(),
            },
            AgentMessage::Result {
                usage: Default::default(),
                num_turns: 1,
                duration_ms: 10,
                is_error: false,
                total_cost_usd: None,
            },
        ]))
        .await;

        session.add_task("t2").await.unwrap();
        let rx = session.subscribe("t2").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t2", "s1").await;

        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t2".to_string(),
            "write a file".to_string(),
            Duration::from_secs(5),
        )
        .await;

        let events = drain(rx).await;
        let progress_with_files = events.iter().find_map(|e| match e {
            Event::Progress { progress, .. } if progress.files_modified > 0 => Some(progress),
            _ => None,
        });
        assert!(progress_with_files.is_some());
    }

    #[tokio::test]
    async fn interrupt_causes_stream_error_then_failed_complete() {
        let (_mgr, session) = new_session(MockScript::HangUntilInterrupted).await;

        session.add_task("t4").await.unwrap();
        let rx = session.subscribe("t4").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t4", "s1").await;

        let agent = session.agent();
        let run = tokio::spawn(run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t4".to_string(),
            "do something slow".to_string(),
            Duration::from_secs(5),
        ));

        // Give the executor time to reach `receive_response` before interrupting.
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.mark_interrupted("t4").await;
        agent.interrupt().await.unwrap();

        run.await.unwrap();

        let events = drain(rx).await;
        assert!(matches!(
            events.last().unwrap(),
            Event::Complete { result, .. } if result.exit_code == 1
        ));

        let record = registry.get("t4").await.unwrap();
        assert_eq!(record.status, crate::registry::TaskStatus::Interrupted);
    }

    #[tokio::test]
    async fn timeout_emits_timeout_error_and_failed_complete() {
        let (_mgr, session) = new_session(MockScript::HangUntilInterrupted).await;

        session.add_task("t5").await.unwrap();
        let rx = session.subscribe("t5").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t5", "s1").await;

        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t5".to_string(),
            "never finishes".to_string(),
            Duration::from_millis(20),
        )
        .await;

        let events = drain(rx).await;
        assert!(matches!(&events[0], Event::Error { message, .. } if message.contains("timed out")));
        assert!(matches!(
            events.last().unwrap(),
            Event::Complete { result, .. } if result.exit_code == 1 && result.errors == vec!["Timeout".to_string()]
        ));
    }

    #[tokio::test]
    async fn stream_error_emits_error_and_failed_complete() {
        let (_mgr, session) = new_session(MockScript::ErrorAfter(vec![], "connection lost".to_string())).await;

        session.add_task("t3").await.unwrap();
        let rx = session.subscribe("t3").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t3", "s1").await;

        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t3".to_string(),
            "prompt".to_string(),
            Duration::from_secs(5),
        )
        .await;

        let events = drain(rx).await;
        assert!(matches!(&events[0], Event::Error { message, .. } if message.contains("connection lost")));
        assert!(matches!(
            events.last().unwrap(),
            Event::Complete { result, .. } if result.exit_code == 1
        ));

        let record = registry.get("t3").await.unwrap();
        assert_eq!(record.status, crate::registry::TaskStatus::Failed);
    }

    #[tokio::test]
    async fn task_is_removed_from_session_on_every_exit_path() {
        let (_mgr, session) = new_session(MockScript::Messages(vec![AgentMessage::Result {
            usage: Default::default(),
            num_turns: 0,
            duration_ms: 1,
            is_error: false,
            total_cost_usd: None,
        }]))
        .await;

        session.add_task("t1").await.unwrap();
        let _rx = session.subscribe("t1").await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        registry.register("t1", "s1").await;

        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t1".to_string(),
            "p".to_string(),
            Duration::from_secs(5),
        )
        .await;

        // A second task can now be added: the session is no longer busy.
        session.add_task("t2").await.unwrap();
    }

    /// `reuse_existing: true` runs a second task over the same agent
    /// connection (`spec.md` §4.5) — `receive_response` must be callable
    /// more than once on one connection.
    #[tokio::test]
    async fn second_task_on_a_reused_session_completes() {
        let (_mgr, session) = new_session_with_scripts(vec![
            MockScript::Messages(vec![AgentMessage::Result {
                usage: Default::default(),
                num_turns: 1,
                duration_ms: 5,
                is_error: false,
                total_cost_usd: None,
            }]),
            MockScript::Messages(vec![AgentMessage::Result {
                usage: Default::default(),
                num_turns: 2,
                duration_ms: 8,
                is_error: false,
                total_cost_usd: None,
            }]),
        ])
        .await;
        let registry = Arc::new(TaskRegistry::new());

        session.add_task("t1").await.unwrap();
        registry.register("t1", "s1").await;
        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t1".to_string(),
            "first".to_string(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            crate::registry::TaskStatus::Completed
        );

        session.add_task("t2").await.unwrap();
        registry.register("t2", "s1").await;
        run_task(
            Arc::clone(&session),
            Arc::clone(&registry),
            "t2".to_string(),
            "second".to_string(),
            Duration::from_secs(5),
        )
        .await;

        let record = registry.get("t2").await.unwrap();
        assert_eq!(record.status, crate::registry::TaskStatus::Completed);
        assert_eq!(record.progress.turns, 2);
    }
}
