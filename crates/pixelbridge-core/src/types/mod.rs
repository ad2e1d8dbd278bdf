//! Core types for pixelbridge.

mod agent;
mod connection;
mod message;

pub use agent::*;
pub use connection::*;
pub use message::*;
