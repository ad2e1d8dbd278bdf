//! Configuration schema definitions.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main pixelbridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream gateway connection.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Observer-facing server.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// External asset and layout sources.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Auth token sent in the connect request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,

    /// Client id announced during the handshake.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Role requested during the handshake.
    #[serde(default = "default_role")]
    pub role: String,

    /// Scopes requested during the handshake.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Lowest protocol version this client speaks.
    #[serde(default = "default_protocol")]
    pub min_protocol: u32,

    /// Highest protocol version this client speaks.
    #[serde(default = "default_protocol")]
    pub max_protocol: u32,

    /// Default per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Time allowed between socket open and `hello-ok`.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Keepalive interval when the gateway does not advertise one.
    #[serde(default = "default_tick_ms")]
    pub default_tick_ms: u64,

    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
            client_id: default_client_id(),
            role: default_role(),
            scopes: default_scopes(),
            min_protocol: default_protocol(),
            max_protocol: default_protocol(),
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            default_tick_ms: default_tick_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_client_id() -> String {
    "pixelbridge".to_string()
}

fn default_role() -> String {
    "operator".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["operator.read".to_string(), "operator.approvals".to_string()]
}

fn default_protocol() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_tick_ms() -> u64 {
    15_000
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First delay after a failure.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Delay ceiling.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
        }
    }
}

fn default_initial_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    30_000
}

/// Observer-facing server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Bind mode.
    #[serde(default)]
    pub bind: BindMode,

    /// Port number.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrently attached observers.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-observer outbound queue length.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Offline buffer length for observer clients.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Origins accepted on non-loopback binds (prefix match).
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            max_connections: default_max_connections(),
            queue_capacity: default_queue_capacity(),
            buffer_capacity: default_buffer_capacity(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    3300
}

fn default_max_connections() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    512
}

fn default_buffer_capacity() -> usize {
    256
}

/// Bind mode for the observer server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1).
    #[default]
    Loopback,

    /// Bind to all interfaces.
    Lan,
}

/// External collaborator sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// JSON asset catalog file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    /// Layout file (defaults to `~/.pixelbridge/layout.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,

    /// One JSON object per line.
    Json,
}
