//! Observer WebSocket server.

use crate::bridge::BridgeHandle;
use crate::hub::{ChannelObserver, Observer, ObserverId};
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use pixelbridge_core::config::{BindMode, ObserverConfig};
use pixelbridge_core::ObserverRequest;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

/// Origins always accepted (prefix match, so any port works).
const LOCAL_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "https://localhost",
    "https://127.0.0.1",
    "vscode-webview://",
];

/// Shared state for observer connections.
pub struct ServerState {
    bridge: BridgeHandle,
    config: ObserverConfig,
    connections: AtomicUsize,
}

impl ServerState {
    fn validate_origin(&self, headers: &HeaderMap) -> bool {
        if self.config.bind == BindMode::Loopback {
            return true;
        }

        let origin = match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
            Some(o) => o,
            // Non-browser client
            None => return true,
        };

        let allowed = LOCAL_ORIGINS
            .iter()
            .copied()
            .chain(self.config.allowed_origins.iter().map(String::as_str))
            .any(|prefix| origin.starts_with(prefix));
        if !allowed {
            warn!(origin, "rejected observer from untrusted origin");
        }
        allowed
    }

    /// Observers currently connected.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Claim a connection slot, or `None` if the server is full.
    fn try_reserve(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let previous = self.connections.fetch_add(1, Ordering::Relaxed);
        if previous >= self.config.max_connections {
            self.connections.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(ConnectionGuard(self.clone()))
    }
}

/// A claimed connection slot, released on drop.
struct ConnectionGuard(Arc<ServerState>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The observer-facing server.
pub struct ObserverServer {
    state: Arc<ServerState>,
}

impl ObserverServer {
    /// Create a server in front of a running bridge.
    pub fn new(config: ObserverConfig, bridge: BridgeHandle) -> Self {
        Self {
            state: Arc::new(ServerState {
                bridge,
                config,
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Address derived from the bind mode and port.
    pub fn bind_address(&self) -> SocketAddr {
        let ip = match self.state.config.bind {
            BindMode::Loopback => [127, 0, 0, 1],
            BindMode::Lan => [0, 0, 0, 0],
        };
        SocketAddr::from((ip, self.state.config.port))
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.bind_address();
        if self.state.config.bind != BindMode::Loopback {
            warn!(%addr, "observer server is reachable from the network");
        }
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "observer server listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("observer server stopped");
        Ok(())
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(create_cors_layer(&self.state.config))
            .with_state(self.state.clone())
    }
}

fn create_cors_layer(config: &ObserverConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = LOCAL_ORIGINS
        .iter()
        .copied()
        .filter(|o| o.starts_with("http"))
        .chain(config.allowed_origins.iter().map(String::as_str))
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    let Some(slot) = state.try_reserve() else {
        warn!(%addr, max = state.config.max_connections, "observer limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    if !state.validate_origin(&headers) {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, addr, slot)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ServerState>,
    addr: SocketAddr,
    _slot: ConnectionGuard,
) {
    debug!(%addr, "observer connected");

    let (observer, mut queue) = ChannelObserver::new(state.config.queue_capacity);
    let observer: Arc<dyn Observer> = Arc::new(observer);
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode observer message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut attached: Option<ObserverId> = None;
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%addr, error = %e, "observer socket error");
                break;
            }
        };

        let request = match serde_json::from_str::<ObserverRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                debug!(%addr, error = %e, "ignoring malformed observer message");
                continue;
            }
        };

        match request {
            ObserverRequest::Ready => {
                // A repeated ready gets a fresh snapshot.
                if let Some(id) = attached.take() {
                    state.bridge.detach(id);
                }
                match state.bridge.attach(observer.clone()).await {
                    Ok(id) => attached = Some(id),
                    Err(e) => {
                        warn!(%addr, error = %e, "cannot attach observer");
                        break;
                    }
                }
            }
            ObserverRequest::Unknown => debug!(%addr, "ignoring unknown observer message"),
            request => {
                if state.bridge.forward(request).is_err() {
                    break;
                }
            }
        }
    }

    if let Some(id) = attached {
        state.bridge.detach(id);
    }
    writer.abort();
    debug!(%addr, "observer disconnected");
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let gateway = state.bridge.gateway();
    Json(json!({
        "status": "ok",
        "observers": state.bridge.hub().len(),
        "connections": state.connections(),
        "gateway": {
            "url": gateway.url(),
            "state": gateway.state(),
            "pendingRequests": gateway.pending_requests(),
        },
    }))
}
