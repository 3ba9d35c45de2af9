//! Configuration, grouped by prefix (`spec.md` §6, `SPEC_FULL.md` §4.6).
//!
//! Loaded from environment variables with the original source's defaults
//! (`original_source/claude_code_server/config.py`). CLI flags in `main.rs`
//! may override the server group after `Config::from_env()` has loaded.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Informational only; this server runs a single multi-threaded
    /// `tokio` runtime rather than `workers` separate processes.
    pub workers: u32,
    pub log_level: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("SERVER_PORT", 8000),
            workers: env_or("SERVER_WORKERS", 4),
            log_level: std::env::var("SERVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub default_allowed_tools: Vec<String>,
    pub default_permission_mode: String,
    pub max_turns: u32,
}

impl AgentConfig {
    fn from_env() -> Result<Self> {
        let api_key = std::env::var("AGENT_API_KEY")
            .context("AGENT_API_KEY is required")?;
        let default_allowed_tools = std::env::var("AGENT_DEFAULT_ALLOWED_TOOLS")
            .unwrap_or_else(|_| "Read,Write,Edit,Bash".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            api_key,
            base_url: env_opt("AGENT_BASE_URL"),
            model: env_opt("AGENT_MODEL"),
            default_allowed_tools,
            default_permission_mode: std::env::var("AGENT_DEFAULT_PERMISSION_MODE")
                .unwrap_or_else(|_| "acceptEdits".to_string()),
            max_turns: env_or("AGENT_MAX_TURNS", 50),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_concurrent: usize,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl SessionSettings {
    fn from_env() -> Self {
        Self {
            max_concurrent: env_or("SESSION_MAX_CONCURRENT", 10),
            idle_timeout: Duration::from_secs(env_or("SESSION_IDLE_TIMEOUT_SECONDS", 1800)),
            cleanup_interval: Duration::from_secs(env_or(
                "SESSION_CLEANUP_INTERVAL_SECONDS",
                300,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub default_timeout: Duration,
    /// Also doubles as the Event Bus's per-task queue capacity.
    pub max_queue_size: usize,
}

impl TaskConfig {
    fn from_env() -> Self {
        Self {
            default_timeout: Duration::from_secs(env_or("TASK_DEFAULT_TIMEOUT_SECONDS", 3600)),
            max_queue_size: env_or("TASK_MAX_QUEUE_SIZE", 100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub bearer_token: Option<String>,
}

impl AuthConfig {
    fn from_env() -> Result<Self> {
        let enabled = env_or("AUTH_ENABLED", false);
        let bearer_token = env_opt("AUTH_BEARER_TOKEN");
        if enabled && bearer_token.is_none() {
            bail!("AUTH_ENABLED=true requires AUTH_BEARER_TOKEN to be set");
        }
        Ok(Self {
            enabled,
            bearer_token,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub session: SessionSettings,
    pub task: TaskConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Load every group from the environment.
    ///
    /// Two hard errors: a missing `AGENT_API_KEY`, and `AUTH_ENABLED=true`
    /// without an `AUTH_BEARER_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env(),
            agent: AgentConfig::from_env()?,
            session: SessionSettings::from_env(),
            task: TaskConfig::from_env(),
            auth: AuthConfig::from_env()?,
        })
    }
}
