//! Reconnecting client for the observer endpoint.
//!
//! Requests sent while offline are held in a bounded buffer and flushed in
//! order right after the `ready` that opens every (re)connect.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pixelbridge_core::config::{ObserverConfig, ReconnectConfig};
use pixelbridge_core::{Backoff, ConnectionState, ObserverRequest, OutboundMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Settings for an [`ObserverConnection`].
#[derive(Debug, Clone)]
pub struct ObserverConnectionConfig {
    /// WebSocket URL of the bridge's `/ws` endpoint.
    pub url: String,
    /// Offline buffer length.
    pub buffer_capacity: usize,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl ObserverConnectionConfig {
    /// Connect to `url` with default buffering and backoff.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            buffer_capacity: ObserverConfig::default().buffer_capacity,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Loopback URL and buffer size for a local bridge.
    pub fn local(observer: &ObserverConfig) -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}/ws", observer.port),
            buffer_capacity: observer.buffer_capacity,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Bounded FIFO that drops its oldest entry on overflow.
#[derive(Debug)]
struct OfflineBuffer {
    items: VecDeque<ObserverRequest>,
    capacity: usize,
    dropped: u64,
}

impl OfflineBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, request: ObserverRequest) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(request);
    }

    /// Put unsent requests back ahead of anything buffered since.
    fn requeue(&mut self, unsent: Vec<ObserverRequest>) {
        for request in unsent.into_iter().rev() {
            if self.items.len() >= self.capacity {
                self.dropped += 1;
                continue;
            }
            self.items.push_front(request);
        }
    }

    fn take(&mut self) -> Vec<ObserverRequest> {
        self.items.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Client handle. Cheap to clone.
#[derive(Clone)]
pub struct ObserverConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ObserverConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    messages: mpsc::UnboundedSender<OutboundMessage>,
    shared: Mutex<Shared>,
}

struct Shared {
    lifecycle: Option<CancellationToken>,
    writer: Option<mpsc::UnboundedSender<ObserverRequest>>,
    buffer: OfflineBuffer,
}

impl ObserverConnection {
    /// Create a disconnected client. Decoded bridge messages arrive on the
    /// returned receiver.
    pub fn new(
        config: ObserverConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (messages, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Shared {
            lifecycle: None,
            writer: None,
            buffer: OfflineBuffer::new(config.buffer_capacity),
        };
        let inner = Inner {
            config,
            state_tx,
            messages,
            shared: Mutex::new(shared),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch the state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Requests waiting for a connection.
    pub fn buffered(&self) -> usize {
        self.inner.shared.lock().buffer.len()
    }

    /// Requests lost to buffer overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.shared.lock().buffer.dropped
    }

    /// Start connecting. Does nothing if already running.
    pub fn connect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.lifecycle.is_some() {
            return;
        }
        let token = CancellationToken::new();
        shared.lifecycle = Some(token.clone());
        tokio::spawn(supervise(self.inner.clone(), token));
    }

    /// Close the socket and stop reconnecting. Buffered requests are kept.
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        if let Some(token) = shared.lifecycle.take() {
            token.cancel();
        }
        shared.writer = None;
        self.inner.publish(ConnectionState::Disconnected);
    }

    /// Send a request now, or buffer it until the next connect.
    pub fn send(&self, request: ObserverRequest) {
        let mut shared = self.inner.shared.lock();
        let request = match &shared.writer {
            Some(writer) => match writer.send(request) {
                Ok(()) => return,
                Err(mpsc::error::SendError(request)) => request,
            },
            None => request,
        };
        shared.buffer.push(request);
    }
}

impl Inner {
    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn transition(&self, token: &CancellationToken, state: ConnectionState) {
        let _shared = self.shared.lock();
        if !token.is_cancelled() {
            self.publish(state);
        }
    }
}

async fn supervise(inner: Arc<Inner>, token: CancellationToken) {
    let reconnect = &inner.config.reconnect;
    let mut backoff = Backoff::from_millis(reconnect.initial_ms, reconnect.max_ms);

    loop {
        let reason = run_session(&inner, &token, &mut backoff).await;
        if token.is_cancelled() {
            break;
        }
        inner.transition(&token, ConnectionState::Disconnected);

        let delay = backoff.next_delay();
        info!(
            url = %inner.config.url,
            reason = %reason,
            delay_ms = delay.as_millis() as u64,
            "observer connection lost, scheduling reconnect"
        );
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(inner: &Inner, token: &CancellationToken, backoff: &mut Backoff) -> String {
    inner.transition(token, ConnectionState::Connecting);
    let ws = tokio::select! {
        _ = token.cancelled() => return "cancelled".to_string(),
        result = tokio_tungstenite::connect_async(inner.config.url.as_str()) => match result {
            Ok((ws, _)) => ws,
            Err(e) => return e.to_string(),
        },
    };
    let (mut sink, mut stream) = ws.split();

    // Take the backlog and install the writer together so nothing sent in
    // between can overtake buffered requests.
    let (writer, mut outbound) = mpsc::unbounded_channel::<ObserverRequest>();
    let backlog = {
        let mut shared = inner.shared.lock();
        if token.is_cancelled() {
            return "cancelled".to_string();
        }
        shared.writer = Some(writer);
        shared.buffer.take()
    };

    let mut pending: VecDeque<ObserverRequest> = std::iter::once(ObserverRequest::Ready)
        .chain(backlog)
        .collect();
    while let Some(request) = pending.pop_front() {
        if let Err(e) = send_request(&mut sink, &request).await {
            if request != ObserverRequest::Ready {
                pending.push_front(request);
            }
            return close_session(inner, token, pending.into_iter().collect(), &mut outbound, e);
        }
    }

    backoff.reset();
    inner.transition(token, ConnectionState::Connected);
    debug!(url = %inner.config.url, "observer connected");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.close().await;
                return "cancelled".to_string();
            }
            Some(request) = outbound.recv() => {
                if let Err(e) = send_request(&mut sink, &request).await {
                    return close_session(inner, token, vec![request], &mut outbound, e);
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        let reason = "closed by bridge".to_string();
                        return close_session(inner, token, Vec::new(), &mut outbound, reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        return close_session(inner, token, Vec::new(), &mut outbound, reason);
                    }
                };
                match serde_json::from_str::<OutboundMessage>(&text) {
                    Ok(message) => {
                        let _ = inner.messages.send(message);
                    }
                    Err(e) => trace!(error = %e, "skipping unknown bridge message"),
                }
            }
        }
    }
}

/// Drop the writer and move every unsent request back into the buffer.
fn close_session(
    inner: &Inner,
    token: &CancellationToken,
    mut unsent: Vec<ObserverRequest>,
    outbound: &mut mpsc::UnboundedReceiver<ObserverRequest>,
    reason: String,
) -> String {
    let mut shared = inner.shared.lock();
    if !token.is_cancelled() {
        shared.writer = None;
    }
    while let Ok(request) = outbound.try_recv() {
        unsent.push(request);
    }
    if !unsent.is_empty() {
        warn!(count = unsent.len(), "requeueing unsent observer requests");
        shared.buffer.requeue(unsent);
    }
    reason
}

async fn send_request<S>(sink: &mut S, request: &ObserverRequest) -> Result<(), String>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(request).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
