//! Shared helpers for the end-to-end tests.
//!
//! [`FakeGateway`] speaks just enough of the gateway protocol to take a
//! bridge through the challenge handshake, answer its requests, and push
//! events at it.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pixelbridge_core::config::{GatewayConfig, ObserverConfig, ReconnectConfig};
use pixelbridge_core::{ConnectionState, OutboundMessage};
use pixelbridge_gateway::protocol::{
    ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame, EVENT_CONNECT_CHALLENGE,
    METHOD_CONNECT,
};
use pixelbridge_gateway::GatewayConnection;
use pixelbridge_server::{Bridge, BridgeHandle, LayoutStore, ObserverServer};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
enum Push {
    Event(EventFrame),
    Close,
}

struct GatewayState {
    token: Option<String>,
    failing: Mutex<HashSet<String>>,
    handshakes: AtomicUsize,
    requests: mpsc::UnboundedSender<RequestFrame>,
    push: broadcast::Sender<Push>,
}

/// In-process gateway on a random loopback port.
pub struct FakeGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<RequestFrame>>,
}

impl FakeGateway {
    /// Start a gateway that accepts any token.
    pub async fn start() -> Self {
        Self::start_with_token(None).await
    }

    /// Start a gateway that rejects `connect` unless the token matches.
    pub async fn start_with_token(token: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(64);
        let state = Arc::new(GatewayState {
            token: token.map(str::to_string),
            failing: Mutex::new(HashSet::new()),
            handshakes: AtomicUsize::new(0),
            requests: requests_tx,
            push,
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_client(stream, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            requests: tokio::sync::Mutex::new(requests_rx),
        }
    }

    /// `ws://` URL of this gateway.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Gateway settings pointing here, with short reconnect delays.
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.url(),
            token: Some("test-token".into()),
            reconnect: ReconnectConfig {
                initial_ms: 50,
                max_ms: 200,
            },
            ..Default::default()
        }
    }

    /// Completed handshakes so far.
    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Answer every later request for `method` with an error.
    pub fn fail_method(&self, method: &str) {
        self.state.failing.lock().insert(method.to_string());
    }

    /// Push an event to every connected client.
    pub fn emit(&self, event: &str, payload: Value) {
        let _ = self.state.push.send(Push::Event(EventFrame::new(event, payload)));
    }

    /// Push an `agent.stream` event.
    pub fn emit_agent(&self, session: &str, stream: &str, data: Value) {
        self.emit(
            pixelbridge_gateway::protocol::EVENT_AGENT_STREAM,
            json!({"sessionKey": session, "runId": "run-1", "stream": stream, "data": data}),
        );
    }

    /// Close every client socket.
    pub fn drop_connections(&self) {
        let _ = self.state.push.send(Push::Close);
    }

    /// Next request for `method`, skipping any others.
    pub async fn next_request(&self, method: &str) -> RequestFrame {
        let mut requests = self.requests.lock().await;
        loop {
            let request = timeout(WAIT, requests.recv())
                .await
                .expect("timed out waiting for gateway request")
                .expect("gateway request channel closed");
            if request.method == method {
                return request;
            }
        }
    }
}

async fn serve_client(stream: TcpStream, state: Arc<GatewayState>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let mut push = state.push.subscribe();

    let challenge = Frame::Event(EventFrame::new(
        EVENT_CONNECT_CHALLENGE,
        json!({"nonce": "n-1", "ts": 1_700_000_000_000i64}),
    ));
    if send(&mut sink, &challenge).await.is_err() {
        return;
    }

    let mut connected = false;
    loop {
        tokio::select! {
            pushed = push.recv(), if connected => match pushed {
                Ok(Push::Event(event)) => {
                    if send(&mut sink, &Frame::Event(event)).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                let Ok(Frame::Req(request)) = Frame::decode(&text) else {
                    continue;
                };

                let response = if request.method == METHOD_CONNECT {
                    let token = request
                        .params
                        .as_ref()
                        .and_then(|p| p.pointer("/auth/token"))
                        .and_then(Value::as_str);
                    match &state.token {
                        Some(expected) if token != Some(expected.as_str()) => {
                            let error = ErrorShape::new("unauthorized", "bad token");
                            ResponseFrame::failure(&request.id, error)
                        }
                        _ => {
                            connected = true;
                            state.handshakes.fetch_add(1, Ordering::SeqCst);
                            ResponseFrame::success(
                                &request.id,
                                json!({
                                    "type": "hello-ok",
                                    "protocol": 3,
                                    "policy": {"tickIntervalMs": 30_000}
                                }),
                            )
                        }
                    }
                } else if state.failing.lock().contains(&request.method) {
                    let error = ErrorShape::new("unavailable", "rejected by test");
                    ResponseFrame::failure(&request.id, error)
                } else {
                    ResponseFrame::success(&request.id, json!({"ok": true}))
                };

                if request.method != METHOD_CONNECT {
                    let _ = state.requests.send(request);
                }
                if send(&mut sink, &Frame::Res(response)).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send<S>(sink: &mut S, frame: &Frame) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let text = frame.encode().map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

/// A bridge plus observer server running against a gateway.
pub struct RunningBridge {
    pub gateway: GatewayConnection,
    pub handle: BridgeHandle,
    pub observer_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RunningBridge {
    /// Wire a bridge to `config`, serve observers on a random port and
    /// connect upstream.
    pub async fn start(config: GatewayConfig, layouts: Option<Arc<dyn LayoutStore>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::start_on(listener, config, layouts).await
    }

    /// Same as [`RunningBridge::start`] on an already bound listener.
    pub async fn start_on(
        listener: TcpListener,
        config: GatewayConfig,
        layouts: Option<Arc<dyn LayoutStore>>,
    ) -> Self {
        let (gateway, events) = GatewayConnection::new(config);
        let mut bridge = Bridge::new(gateway.clone(), events);
        if let Some(layouts) = layouts {
            bridge = bridge.with_layout_store(layouts);
        }
        let handle = bridge.handle();
        tokio::spawn(bridge.run());

        let addr = listener.local_addr().unwrap();
        let (shutdown, stop) = oneshot::channel::<()>();
        let server = ObserverServer::new(ObserverConfig::default(), handle.clone());
        tokio::spawn(async move {
            let _ = server
                .serve(listener, async {
                    let _ = stop.await;
                })
                .await;
        });

        gateway.connect();
        Self {
            gateway,
            handle,
            observer_url: format!("ws://{}/ws", addr),
            shutdown: Some(shutdown),
        }
    }

    /// Wait until the upstream connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        wait_for_state(&self.gateway, state).await;
    }
}

impl Drop for RunningBridge {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.handle.shutdown();
    }
}

/// Wait until `gateway` reports `state`.
pub async fn wait_for_state(gateway: &GatewayConnection, state: ConnectionState) {
    let mut watch = gateway.subscribe_state();
    timeout(WAIT, watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("gateway never reached {}", state))
        .expect("state channel closed");
}

/// Next observer message.
pub async fn recv(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for observer message")
        .expect("observer message channel closed")
}

/// Skip messages until one matches.
pub async fn recv_until<F>(
    rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    mut matches: F,
) -> OutboundMessage
where
    F: FnMut(&OutboundMessage) -> bool,
{
    loop {
        let message = recv(rx).await;
        if matches(&message) {
            return message;
        }
    }
}
