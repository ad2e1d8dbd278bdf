//! Downstream side of pixelbridge.
//!
//! This crate provides:
//! - [`BroadcastHub`], the observer fan-out with snapshot replay
//! - [`Bridge`], the runtime that owns the translator and wires the gateway to the hub
//! - [`ObserverServer`], the axum WebSocket endpoint observers attach to
//! - [`ObserverConnection`], a reconnecting client for that endpoint
//! - [`AssetSource`] and [`LayoutStore`], seams for external collaborators

pub mod assets;
pub mod bridge;
pub mod error;
pub mod hub;
pub mod observer;
pub mod server;

pub use assets::{AssetSource, FileAssetSource, FileLayoutStore, LayoutStore, NoAssets};
pub use bridge::{Bridge, BridgeHandle};
pub use error::ServerError;
pub use hub::{BroadcastHub, ChannelObserver, Delivery, Observer, ObserverId, Snapshot};
pub use observer::{ObserverConnection, ObserverConnectionConfig};
pub use server::{ObserverServer, ServerState};

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
