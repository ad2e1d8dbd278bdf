//! Configuration loading and persistence.

use super::Config;
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to the default path.
    pub fn save_default(&self) -> Result<(), ConfigError> {
        let path = paths::config_file()?;
        self.save(&path)
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let gateway = &self.gateway;

        // 1. Gateway URL must be a WebSocket URL
        match url::Url::parse(&gateway.url) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {}
            Ok(parsed) => errors.push(format!(
                "Gateway url '{}' must use ws:// or wss://, got '{}'",
                gateway.url,
                parsed.scheme()
            )),
            Err(e) => errors.push(format!("Gateway url '{}' is invalid: {}", gateway.url, e)),
        }

        // 2. Protocol bounds
        if gateway.max_protocol < gateway.min_protocol {
            errors.push(format!(
                "Gateway max_protocol ({}) is below min_protocol ({})",
                gateway.max_protocol, gateway.min_protocol
            ));
        }

        // 3. Timeouts
        for (name, value) in [
            ("request_timeout_ms", gateway.request_timeout_ms),
            ("handshake_timeout_ms", gateway.handshake_timeout_ms),
            ("default_tick_ms", gateway.default_tick_ms),
        ] {
            if value == 0 {
                errors.push(format!("Gateway {} must be greater than 0", name));
            }
        }

        // 4. Reconnect window
        if gateway.reconnect.initial_ms == 0 {
            errors.push("Reconnect initial_ms must be greater than 0".to_string());
        }
        if gateway.reconnect.max_ms < gateway.reconnect.initial_ms {
            errors.push(format!(
                "Reconnect max_ms ({}) is below initial_ms ({})",
                gateway.reconnect.max_ms, gateway.reconnect.initial_ms
            ));
        }

        // 5. Observer server
        if self.observer.port == 0 {
            errors.push("Observer port cannot be 0".to_string());
        }
        for (name, value) in [
            ("max_connections", self.observer.max_connections),
            ("queue_capacity", self.observer.queue_capacity),
            ("buffer_capacity", self.observer.buffer_capacity),
        ] {
            if value == 0 {
                errors.push(format!("Observer {} must be greater than 0", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Load configuration from the default path, falling back to defaults if no file exists.
    ///
    /// Environment overrides are applied in both cases.
    pub fn load_or_default() -> Self {
        let config = match Self::load_default() {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Apply `PIXELBRIDGE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env::get_var(env::vars::PIXELBRIDGE_GATEWAY_URL) {
            self.gateway.url = url;
        }
        if let Some(token) = env::get_var(env::vars::PIXELBRIDGE_GATEWAY_TOKEN) {
            self.gateway.token = Some(token.into());
        }
        if let Some(port) = env::get_u16(env::vars::PIXELBRIDGE_PORT) {
            self.observer.port = port;
        }
        self
    }
}

/// Configuration builder for creating configs programmatically.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway URL.
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.gateway.url = url.into();
        self
    }

    /// Set the gateway auth token.
    pub fn gateway_token(mut self, token: impl Into<String>) -> Self {
        self.config.gateway.token = Some(token.into().into());
        self
    }

    /// Set the reconnect window.
    pub fn reconnect(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.config.gateway.reconnect.initial_ms = initial_ms;
        self.config.gateway.reconnect.max_ms = max_ms;
        self
    }

    /// Set the observer port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.observer.port = port;
        self
    }

    /// Set the observer bind mode.
    pub fn bind(mut self, mode: super::BindMode) -> Self {
        self.config.observer.bind = mode;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: super::LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
