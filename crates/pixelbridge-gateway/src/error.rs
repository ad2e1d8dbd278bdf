//! Gateway error types.

use thiserror::Error;

/// Errors that can occur talking to the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A request was made while the handshake has not completed.
    #[error("Not connected")]
    NotConnected,

    /// The socket closed while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived in time.
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The gateway answered with `ok: false`.
    #[error("Gateway rejected request: {code}: {message}")]
    Rejected { code: String, message: String },

    /// The connect exchange failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request id is already pending.
    #[error("Duplicate request id: {0}")]
    DuplicateRequest(String),
}

impl GatewayError {
    /// Whether the error is a transport condition that reconnect backoff
    /// recovers from. A refused handshake or a rejected request is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionClosed | Self::Timeout { .. } | Self::WebSocket(_)
        )
    }
}
