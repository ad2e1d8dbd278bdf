//! Connection lifecycle types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one directional connection (upstream gateway or downstream observer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket, possibly waiting for a reconnect.
    #[default]
    Disconnected,

    /// Socket is being opened.
    Connecting,

    /// Socket is open, waiting for the challenge/hello exchange.
    Handshaking,

    /// Handshake completed, frames flow normally.
    Connected,

    /// The last attempt failed before a socket was established.
    Error,
}

impl ConnectionState {
    /// Whether a connection attempt is in flight or established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking | Self::Connected)
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
