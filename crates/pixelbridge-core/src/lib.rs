//! # pixelbridge-core
//!
//! Core types, configuration, and utilities for pixelbridge.
//!
//! This crate provides shared functionality used across all pixelbridge crates:
//!
//! - **Configuration**: Loading, validation, and management of the config file
//! - **Types**: Tracked agents and tools, connection state, and the observer message vocabulary
//! - **Utilities**: Path resolution, environment handling, reconnect backoff, tool status text

pub mod backoff;
pub mod config;
pub mod env;
pub mod error;
pub mod paths;
pub mod secret;
pub mod tool_status;
pub mod types;

// Re-exports for convenience
pub use backoff::Backoff;
pub use config::Config;
pub use error::{Error, Result};
pub use secret::SecretString;
pub use types::*;
