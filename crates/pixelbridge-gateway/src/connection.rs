//! Reconnecting gateway client.
//!
//! A single supervisor task owns the socket. It connects, answers the
//! `connect.challenge` with a `connect` request, and on `hello-ok` marks the
//! connection usable and starts the keepalive. When the socket drops it fails
//! every pending request and retries with exponential backoff until
//! [`GatewayConnection::disconnect`] cancels it.

use crate::correlator::RequestCorrelator;
use crate::error::GatewayError;
use crate::protocol::{
    ConnectChallenge, ConnectParams, EventFrame, Frame, HelloOk, RequestFrame,
    EVENT_CONNECT_CHALLENGE, EVENT_TICK, METHOD_CONNECT,
};
use crate::Result;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use pixelbridge_core::config::GatewayConfig;
use pixelbridge_core::{Backoff, ConnectionState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Notification from the connection to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The connection state changed.
    State(ConnectionState),

    /// An application event arrived after the handshake.
    Event(EventFrame),
}

/// Handle to the gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct GatewayConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: GatewayConfig,
    correlator: Arc<RequestCorrelator>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    /// Set while a supervisor is running.
    lifecycle: Option<CancellationToken>,
    /// Set while connected.
    writer: Option<mpsc::UnboundedSender<Message>>,
}

impl GatewayConnection {
    /// Create a disconnected client.
    ///
    /// Events and state changes are delivered on the returned receiver.
    pub fn new(config: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            config,
            correlator: Arc::new(RequestCorrelator::new()),
            state_tx,
            events,
            shared: Mutex::new(Shared::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch the connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Gateway URL this client dials.
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Start connecting. Does nothing if already connecting, connected, or
    /// waiting to reconnect.
    pub fn connect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.lifecycle.is_some() {
            debug!("gateway connection already running");
            return;
        }

        let token = CancellationToken::new();
        shared.lifecycle = Some(token.clone());
        tokio::spawn(supervise(self.inner.clone(), token));
    }

    /// Close the socket, cancel any pending reconnect, and fail all
    /// pending requests.
    pub fn disconnect(&self) {
        {
            let mut shared = self.inner.shared.lock();
            if let Some(token) = shared.lifecycle.take() {
                token.cancel();
            }
            shared.writer = None;
            self.inner.publish(ConnectionState::Disconnected);
        }
        let failed = self
            .inner
            .correlator
            .fail_all(|| GatewayError::ConnectionClosed);
        info!(failed, "disconnected from gateway");
    }

    /// Send a request using the configured timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        self.request_with_timeout(method, params, timeout).await
    }

    /// Send a request and wait for its response.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let writer = {
            let shared = self.inner.shared.lock();
            if !self.is_connected() {
                return Err(GatewayError::NotConnected);
            }
            shared.writer.clone().ok_or(GatewayError::NotConnected)?
        };

        let id = Uuid::new_v4().to_string();
        let text = Frame::Req(RequestFrame::new(id.clone(), method, params)).encode()?;
        let handle = self.inner.correlator.register(id.clone(), method, timeout)?;

        trace!(id = %id, method, "sending gateway request");
        if writer.send(Message::Text(text)).is_err() {
            self.inner
                .correlator
                .reject(&id, GatewayError::ConnectionClosed);
        }
        handle.wait().await
    }
}

impl Inner {
    fn publish(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(state = %state, "gateway connection state changed");
            let _ = self.events.send(GatewayEvent::State(state));
        }
    }

    /// Publish a state on behalf of a supervisor, unless it was cancelled.
    fn transition(&self, token: &CancellationToken, state: ConnectionState) {
        let _shared = self.shared.lock();
        if !token.is_cancelled() {
            self.publish(state);
        }
    }

    fn install_writer(
        &self,
        token: &CancellationToken,
        writer: mpsc::UnboundedSender<Message>,
    ) -> bool {
        let mut shared = self.shared.lock();
        if token.is_cancelled() {
            return false;
        }
        shared.writer = Some(writer);
        true
    }

    fn session_closed(&self, token: &CancellationToken, state: ConnectionState) {
        {
            let mut shared = self.shared.lock();
            if token.is_cancelled() {
                return;
            }
            shared.writer = None;
            self.publish(state);
        }
        self.correlator.fail_all(|| GatewayError::ConnectionClosed);
    }

    /// Forward an application event on behalf of a supervisor, unless it was
    /// cancelled.
    fn forward(&self, token: &CancellationToken, event: EventFrame) {
        if token.is_cancelled() {
            trace!(event = %event.event, "dropping event from cancelled session");
            return;
        }
        let _ = self.events.send(GatewayEvent::Event(event));
    }
}

/// Why a session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Failed(GatewayError),
}

impl From<GatewayError> for SessionEnd {
    fn from(err: GatewayError) -> Self {
        Self::Failed(err)
    }
}

/// State published after a failed session. Transport failures are retried
/// quietly; a refused handshake is reported as an error until the next
/// attempt.
fn state_after(err: &GatewayError) -> ConnectionState {
    if err.is_transient() {
        ConnectionState::Disconnected
    } else {
        ConnectionState::Error
    }
}

async fn supervise(inner: Arc<Inner>, token: CancellationToken) {
    let reconnect = &inner.config.reconnect;
    let mut backoff = Backoff::from_millis(reconnect.initial_ms, reconnect.max_ms);

    loop {
        let err = match run_session(&inner, &token, &mut backoff).await {
            SessionEnd::Failed(err) if !token.is_cancelled() => err,
            _ => break,
        };
        inner.session_closed(&token, state_after(&err));

        let delay = backoff.next_delay();
        info!(
            url = %inner.config.url,
            reason = %err,
            delay_ms = delay.as_millis() as u64,
            "gateway connection lost, scheduling reconnect"
        );

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("gateway supervisor stopped");
}

async fn run_session(
    inner: &Inner,
    token: &CancellationToken,
    backoff: &mut Backoff,
) -> SessionEnd {
    let url = inner.config.url.as_str();
    inner.transition(token, ConnectionState::Connecting);

    let ws = tokio::select! {
        _ = token.cancelled() => return SessionEnd::Cancelled,
        result = tokio_tungstenite::connect_async(url) => match result {
            Ok((ws, _)) => ws,
            Err(e) => return GatewayError::WebSocket(e.to_string()).into(),
        },
    };

    inner.transition(token, ConnectionState::Handshaking);
    debug!(url, "gateway socket open, awaiting challenge");

    let (mut sink, mut stream) = ws.split();
    let (writer, mut outbound) = mpsc::unbounded_channel::<Message>();
    let handshake_ms = inner.config.handshake_timeout_ms;
    let handshake = tokio::time::sleep(Duration::from_millis(handshake_ms));
    tokio::pin!(handshake);

    let mut handshake_id: Option<String> = None;
    let mut keepalive: Option<Interval> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.close().await;
                return SessionEnd::Cancelled;
            }
            _ = &mut handshake, if keepalive.is_none() => {
                return GatewayError::Timeout {
                    method: METHOD_CONNECT.to_string(),
                    timeout_ms: handshake_ms,
                }
                .into();
            }
            _ = next_tick(&mut keepalive) => {
                let tick = Frame::Event(EventFrame::bare(EVENT_TICK));
                if let Err(e) = send_frame(&mut sink, &tick).await {
                    return e.into();
                }
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    return GatewayError::WebSocket(e.to_string()).into();
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            debug!(code = %frame.code, reason = %frame.reason, "gateway closed");
                        }
                        return GatewayError::ConnectionClosed.into();
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return GatewayError::WebSocket(e.to_string()).into(),
                    None => return GatewayError::ConnectionClosed.into(),
                };

                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed gateway frame");
                        continue;
                    }
                };

                let connected = keepalive.is_some();
                match frame {
                    Frame::Event(ev) if !connected && ev.event == EVENT_CONNECT_CHALLENGE => {
                        if handshake_id.is_some() {
                            debug!("ignoring repeated connect challenge");
                            continue;
                        }
                        let challenge: ConnectChallenge = ev
                            .payload
                            .and_then(|p| serde_json::from_value(p).ok())
                            .unwrap_or_default();
                        debug!(nonce = ?challenge.nonce, "received connect challenge");

                        let params = ConnectParams::from_config(&inner.config);
                        let params = match serde_json::to_value(params) {
                            Ok(params) => params,
                            Err(e) => return GatewayError::Json(e).into(),
                        };
                        let id = Uuid::new_v4().to_string();
                        let request =
                            Frame::Req(RequestFrame::new(id.clone(), METHOD_CONNECT, params));
                        if let Err(e) = send_frame(&mut sink, &request).await {
                            return e.into();
                        }
                        handshake_id = Some(id);
                    }
                    Frame::Res(res)
                        if !connected && handshake_id.as_deref() == Some(res.id.as_str()) =>
                    {
                        let hello = match HelloOk::from_response(&res) {
                            Ok(hello) => hello,
                            Err(reason) => return GatewayError::Handshake(reason).into(),
                        };
                        let tick_ms = hello
                            .policy
                            .tick_interval_ms
                            .filter(|ms| *ms > 0)
                            .unwrap_or(inner.config.default_tick_ms);
                        let period = Duration::from_millis(tick_ms);
                        let mut interval =
                            tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        keepalive = Some(interval);
                        backoff.reset();

                        if !inner.install_writer(token, writer.clone()) {
                            return SessionEnd::Cancelled;
                        }
                        inner.transition(token, ConnectionState::Connected);
                        info!(url, protocol = ?hello.protocol, tick_ms, "connected to gateway");
                    }
                    _ if !connected => trace!("ignoring frame before handshake completes"),
                    Frame::Res(res) => {
                        inner.correlator.complete(res);
                    }
                    Frame::Event(ev) if ev.event == EVENT_TICK => trace!("gateway tick"),
                    Frame::Event(ev) => inner.forward(token, ev),
                    Frame::Req(req) => {
                        debug!(method = %req.method, "ignoring gateway-initiated request");
                    }
                }
            }
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = frame.encode()?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| GatewayError::WebSocket(e.to_string()))
}
