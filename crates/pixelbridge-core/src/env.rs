//! Environment variable handling.

use std::env;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable as a boolean.
pub fn get_bool(name: &str) -> bool {
    get_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Get an environment variable as a u16 (e.g., for ports).
pub fn get_u16(name: &str) -> Option<u16> {
    get_var(name).and_then(|v| v.parse().ok())
}

/// Environment variable names read by pixelbridge.
pub mod vars {
    /// Home directory override (defaults to `~/.pixelbridge`).
    pub const PIXELBRIDGE_HOME: &str = "PIXELBRIDGE_HOME";

    /// Config file override.
    pub const PIXELBRIDGE_CONFIG: &str = "PIXELBRIDGE_CONFIG";

    /// Upstream gateway WebSocket URL.
    pub const PIXELBRIDGE_GATEWAY_URL: &str = "PIXELBRIDGE_GATEWAY_URL";

    /// Upstream gateway auth token.
    pub const PIXELBRIDGE_GATEWAY_TOKEN: &str = "PIXELBRIDGE_GATEWAY_TOKEN";

    /// Observer server port.
    pub const PIXELBRIDGE_PORT: &str = "PIXELBRIDGE_PORT";
}
