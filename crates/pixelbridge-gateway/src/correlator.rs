//! Request/response correlation.
//!
//! Every outgoing request registers a pending entry before its frame is
//! written. The entry leaves the table exactly once: on a matching response,
//! on its timeout, or when the connection fails everything still pending.

use crate::error::GatewayError;
use crate::protocol::ResponseFrame;
use crate::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

/// A request waiting for its response.
struct PendingRequest {
    method: String,
    created_at: Instant,
    timeout: Duration,
    timer: AbortHandle,
    tx: oneshot::Sender<Result<Value>>,
}

/// Table of in-flight requests keyed by request id.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and arm its timeout.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        id: impl Into<String>,
        method: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingHandle> {
        let id = id.into();
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(GatewayError::DuplicateRequest(id));
        }

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(correlator) = weak.upgrade() {
                correlator.expire(&timer_id);
            }
        })
        .abort_handle();

        pending.insert(
            id.clone(),
            PendingRequest {
                method: method.into(),
                created_at: Instant::now(),
                timeout,
                timer,
                tx,
            },
        );

        Ok(PendingHandle { id, rx })
    }

    /// Complete a request successfully. Unknown ids are ignored.
    pub fn resolve(&self, id: &str, payload: Value) -> bool {
        self.settle(id, |_| Ok(payload))
    }

    /// Fail a request. Unknown ids are ignored.
    pub fn reject(&self, id: &str, error: GatewayError) -> bool {
        self.settle(id, |_| Err(error))
    }

    /// Settle a request from a response frame.
    pub fn complete(&self, res: ResponseFrame) -> bool {
        if res.ok {
            self.resolve(&res.id, res.payload.unwrap_or(Value::Null))
        } else {
            let err = res.error.unwrap_or_default();
            self.reject(
                &res.id,
                GatewayError::Rejected {
                    code: err.code,
                    message: err.message,
                },
            )
        }
    }

    /// Fail a request with a timeout error.
    pub fn expire(&self, id: &str) -> bool {
        self.settle(id, |p| {
            Err(GatewayError::Timeout {
                method: p.method.clone(),
                timeout_ms: p.timeout.as_millis() as u64,
            })
        })
    }

    /// Fail every pending request, returning how many were failed.
    pub fn fail_all(&self, error: impl Fn() -> GatewayError) -> usize {
        let drained: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            pending.timer.abort();
            let _ = pending.tx.send(Err(error()));
        }
        if count > 0 {
            debug!(count, "failed pending gateway requests");
        }
        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    fn settle(&self, id: &str, outcome: impl FnOnce(&PendingRequest) -> Result<Value>) -> bool {
        let Some(pending) = self.pending.lock().remove(id) else {
            debug!(id, "no pending request for id");
            return false;
        };
        pending.timer.abort();
        let result = outcome(&pending);
        debug!(
            id,
            method = %pending.method,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "settled gateway request"
        );
        let _ = pending.tx.send(result);
        true
    }
}

/// Receiving end of a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    id: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingHandle {
    /// The request id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the request to settle.
    pub async fn wait(self) -> Result<Value> {
        self.rx.await.unwrap_or(Err(GatewayError::ConnectionClosed))
    }
}
