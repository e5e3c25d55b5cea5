//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.janus/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Gateway address, keepalive, and queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// WebSocket URL (default "ws://127.0.0.1:8188/janus"). Overridden by JANUS_GATEWAY_URL env.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Seconds between transport keepalives (default 30). 0 disables them.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Deadline in seconds for writing one keepalive (default 20).
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Seconds a request waits for its reply (default 60). 0 waits without bound.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the background error queue (default 8).
    #[serde(default = "default_error_queue_capacity")]
    pub error_queue_capacity: usize,

    /// Capacity of each session's event queue (default 2).
    #[serde(default = "default_session_event_capacity")]
    pub session_event_capacity: usize,

    /// Capacity of each handle's event queue (default 64).
    #[serde(default = "default_handle_event_capacity")]
    pub handle_event_capacity: usize,

    /// Deliveries to full queues allowed in flight at once (default 256). Beyond that, events are dropped.
    #[serde(default = "default_max_pending_deliveries")]
    pub max_pending_deliveries: usize,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:8188/janus".to_string()
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    20
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_error_queue_capacity() -> usize {
    8
}

fn default_session_event_capacity() -> usize {
    2
}

fn default_handle_event_capacity() -> usize {
    64
}

fn default_max_pending_deliveries() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            error_queue_capacity: default_error_queue_capacity(),
            session_event_capacity: default_session_event_capacity(),
            handle_event_capacity: default_handle_event_capacity(),
            max_pending_deliveries: default_max_pending_deliveries(),
        }
    }
}

/// Resolve the gateway URL: env JANUS_GATEWAY_URL overrides config.
pub fn resolve_gateway_url(config: &ClientConfig) -> String {
    non_empty(std::env::var("JANUS_GATEWAY_URL").ok())
        .unwrap_or_else(|| config.gateway.url.trim().to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("JANUS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".janus").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or JANUS_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(ClientConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        ClientConfig::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
