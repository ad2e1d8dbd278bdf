//! Upstream side of pixelbridge.
//!
//! This crate provides:
//! - The gateway wire frames (`req`/`res`/`event`)
//! - [`RequestCorrelator`] for matching responses to pending requests
//! - [`GatewayConnection`], the reconnecting, handshaking WebSocket client
//! - [`EventTranslator`], which turns gateway agent events into observer messages

pub mod connection;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod translator;

pub use connection::{GatewayConnection, GatewayEvent};
pub use correlator::{PendingHandle, RequestCorrelator};
pub use error::GatewayError;
pub use protocol::{EventFrame, Frame, RequestFrame, ResponseFrame};
pub use translator::EventTranslator;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
