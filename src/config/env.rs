// Environment-based configuration: every env var the aggregator reads, in
// one place.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs_env(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Everything configurable via environment variables, loaded once at
/// startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `MCP_AGGREGATOR_CONTAINER_ENGINE`, defaults to `podman`.
    pub container_engine: String,
    /// `MCP_AGGREGATOR_STATE_DIR`, defaults to `~/.mcp-aggregator`.
    pub state_dir: PathBuf,
    /// `MCP_AGGREGATOR_REFRESH_INTERVAL_SECS` override for the scheduler's
    /// wake interval.
    pub refresh_wake_interval: Option<Duration>,
    /// `MCP_AGGREGATOR_REFRESH_MIN_INTERVAL_SECS` override for the minimum
    /// time between refreshes of the same source.
    pub refresh_min_interval: Option<Duration>,
    /// `MCP_AGGREGATOR_CALL_TIMEOUT_SECS` override for `tools/call` deadlines.
    pub call_timeout: Option<Duration>,
    /// Effective log level: `MCP_AGGREGATOR_LOG`, falling back to `RUST_LOG`,
    /// falling back to `info`.
    pub log_level: String,
    /// `MCP_AGGREGATOR_FORCE_REFRESH_ON_START`, defaults to false.
    pub force_refresh_on_start: bool,
}

impl EnvConfig {
    pub fn load() -> Self {
        debug!("loading environment configuration");

        let state_dir = std::env::var("MCP_AGGREGATOR_STATE_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let config = Self {
            container_engine: std::env::var("MCP_AGGREGATOR_CONTAINER_ENGINE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "podman".to_string()),
            state_dir,
            refresh_wake_interval: parse_secs_env("MCP_AGGREGATOR_REFRESH_INTERVAL_SECS"),
            refresh_min_interval: parse_secs_env("MCP_AGGREGATOR_REFRESH_MIN_INTERVAL_SECS"),
            call_timeout: parse_secs_env("MCP_AGGREGATOR_CALL_TIMEOUT_SECS"),
            log_level: std::env::var("MCP_AGGREGATOR_LOG")
                .ok()
                .or_else(|| std::env::var("RUST_LOG").ok())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "info".to_string()),
            force_refresh_on_start: parse_bool_env("MCP_AGGREGATOR_FORCE_REFRESH_ON_START")
                .unwrap_or(false),
        };

        info!(
            container_engine = %config.container_engine,
            state_dir = %config.state_dir.display(),
            "environment configuration loaded"
        );
        config
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| {
            tracing::warn!(
                "HOME directory not set, using current directory for state; set $HOME to avoid this"
            );
            PathBuf::from(".")
        })
        .join(".mcp-aggregator")
}
