//! agent-task-server
//!
//! Long-running task execution server mediating HTTP/WebSocket clients
//! and a conversational code-editing agent (`spec.md`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_task_server::agent::process::ProcessAgentConnector;
use agent_task_server::config::Config;
use agent_task_server::http::{build_router, build_state};

#[derive(Parser, Debug)]
#[command(name = "agent-task-server")]
#[command(about = "Task execution server mediating clients and a conversational agent")]
struct Args {
    /// Override `SERVER_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Override `SERVER_PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Override `SERVER_LOG_LEVEL`.
    #[arg(long)]
    log_level: Option<String>,

    /// Path to the agent executable this server spawns per session.
    #[arg(long, default_value = "claude-agent")]
    agent_exec: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(log_level) = args.log_level {
        config.server.log_level = log_level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        host = %config.server.host,
        port = config.server.port,
        max_concurrent = config.session.max_concurrent,
        "starting agent-task-server"
    );

    let connector = Arc::new(ProcessAgentConnector {
        exec_path: args.agent_exec,
        ready_timeout: Duration::from_secs(30),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config, connector);
    let reaper = state.sessions.start_reaper();
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.abort();
    state.sessions.shutdown_all().await;
    info!("shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C (`spec.md` §5: reaper cancelled first, then every
/// session's agent connection is disconnected).
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
