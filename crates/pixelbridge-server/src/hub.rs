//! Observer fan-out.
//!
//! The hub holds every attached observer. Delivery never blocks: each
//! observer owns a bounded queue drained by its own writer, and a message
//! that does not fit is dropped for that observer only. The attach snapshot
//! is the exception: an observer that cannot queue all of it is not added.

use parking_lot::RwLock;
use pixelbridge_core::{ConnectionState, OutboundMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Hub-assigned observer handle.
pub type ObserverId = u64;

/// Result of handing a message to one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for writing.
    Queued,
    /// The observer's queue was full; this message is lost for it.
    Dropped,
    /// The observer is gone and should be detached.
    Closed,
}

/// A downstream consumer of outbound messages.
pub trait Observer: Send + Sync {
    /// Hand over a message without waiting.
    fn deliver(&self, message: &OutboundMessage) -> Delivery;
}

/// Observer backed by a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its writer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, message: &OutboundMessage) -> Delivery {
        match self.tx.try_send(message.clone()) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// State replayed to a newly attached observer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Asset catalog, if one could be loaded.
    pub catalog: Option<Value>,
    /// Persisted layout, or `None` for the built-in default.
    pub layout: Option<Value>,
    /// The `existingAgents` roster.
    pub roster: OutboundMessage,
    /// Per-agent status and open tool replay.
    pub replay: Vec<OutboundMessage>,
    /// Current gateway connection state.
    pub connection: ConnectionState,
}

impl Snapshot {
    /// Messages in replay order: assets, roster, agent replay, connection status.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        let mut out = Vec::with_capacity(self.replay.len() + 4);
        if let Some(catalog) = &self.catalog {
            out.push(OutboundMessage::AssetCatalogLoaded {
                catalog: catalog.clone(),
            });
        }
        out.push(OutboundMessage::LayoutLoaded {
            layout: self.layout.clone(),
        });
        out.push(self.roster.clone());
        out.extend(self.replay.iter().cloned());
        out.push(OutboundMessage::ConnectionStatus {
            status: self.connection,
        });
        out
    }
}

/// The set of attached observers.
#[derive(Default)]
pub struct BroadcastHub {
    observers: RwLock<HashMap<ObserverId, Arc<dyn Observer>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer and replay `snapshot` to it before any later
    /// broadcast can reach it.
    ///
    /// Returns `None` without adding the observer if it closed or could not
    /// queue the whole snapshot.
    pub fn attach(&self, observer: Arc<dyn Observer>, snapshot: &Snapshot) -> Option<ObserverId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut observers = self.observers.write();

        let messages = snapshot.messages();
        for (replayed, message) in messages.iter().enumerate() {
            match observer.deliver(message) {
                Delivery::Queued => {}
                Delivery::Dropped => {
                    warn!(
                        observer_id = id,
                        replayed,
                        snapshot = messages.len(),
                        "observer queue too small for snapshot, not attaching"
                    );
                    return None;
                }
                Delivery::Closed => {
                    debug!(observer_id = id, "observer closed during snapshot replay");
                    return None;
                }
            }
        }

        observers.insert(id, observer);
        debug!(observer_id = id, replayed = messages.len(), "observer attached");
        Some(id)
    }

    /// Remove an observer. Returns whether it was attached.
    pub fn detach(&self, id: ObserverId) -> bool {
        let removed = self.observers.write().remove(&id).is_some();
        if removed {
            debug!(observer_id = id, "observer detached");
        }
        removed
    }

    /// Send a message to every attached observer.
    ///
    /// Observers found closed are detached. Returns how many observers
    /// queued the message.
    pub fn publish(&self, message: &OutboundMessage) -> usize {
        let mut queued = 0;
        let mut closed = Vec::new();
        {
            let observers = self.observers.read();
            for (id, observer) in observers.iter() {
                match observer.deliver(message) {
                    Delivery::Queued => queued += 1,
                    Delivery::Dropped => {
                        warn!(
                            observer_id = *id,
                            kind = message.kind(),
                            "observer queue full, dropping message"
                        );
                    }
                    Delivery::Closed => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.detach(id);
        }
        queued
    }

    /// Number of attached observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observer is attached.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelbridge_core::{AgentId, ObservedStatus};
    use serde_json::json;

    fn empty_snapshot(connection: ConnectionState) -> Snapshot {
        Snapshot {
            catalog: None,
            layout: None,
            roster: OutboundMessage::ExistingAgents {
                agents: vec![],
                meta: vec![],
            },
            replay: vec![],
            connection,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_snapshot_order() {
        let snapshot = Snapshot {
            catalog: Some(json!({"characters": []})),
            layout: Some(json!({"version": 1})),
            roster: OutboundMessage::ExistingAgents {
                agents: vec![AgentId(1)],
                meta: vec![],
            },
            replay: vec![OutboundMessage::AgentStatus {
                id: AgentId(1),
                status: ObservedStatus::Active,
            }],
            connection: ConnectionState::Connected,
        };

        let kinds: Vec<_> = snapshot.messages().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "assetCatalogLoaded",
                "layoutLoaded",
                "existingAgents",
                "agentStatus",
                "connectionStatus"
            ]
        );
    }

    #[test]
    fn test_snapshot_without_catalog() {
        let kinds: Vec<_> = empty_snapshot(ConnectionState::Disconnected)
            .messages()
            .iter()
            .map(|m| m.kind())
            .collect();
        assert_eq!(kinds, vec!["layoutLoaded", "existingAgents", "connectionStatus"]);
    }

    #[tokio::test]
    async fn test_attach_replays_then_receives_broadcasts() {
        let hub = BroadcastHub::new();
        let (observer, mut rx) = ChannelObserver::new(16);

        hub.attach(Arc::new(observer), &empty_snapshot(ConnectionState::Connected));
        hub.publish(&OutboundMessage::AgentToolsClear { id: AgentId(1) });

        let kinds: Vec<_> = drain(&mut rx).iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec!["layoutLoaded", "existingAgents", "connectionStatus", "agentToolsClear"]
        );
    }

    #[tokio::test]
    async fn test_closed_observer_does_not_affect_others() {
        let hub = BroadcastHub::new();
        let (a, rx_a) = ChannelObserver::new(16);
        let (b, mut rx_b) = ChannelObserver::new(16);
        let snapshot = empty_snapshot(ConnectionState::Connected);
        hub.attach(Arc::new(a), &snapshot);
        hub.attach(Arc::new(b), &snapshot);
        drain(&mut rx_b);
        drop(rx_a);

        let queued = hub.publish(&OutboundMessage::AgentToolsClear { id: AgentId(2) });
        assert_eq!(queued, 1);
        assert_eq!(hub.len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_detaching() {
        let hub = BroadcastHub::new();
        let (slow, mut rx) = ChannelObserver::new(3);
        hub.attach(Arc::new(slow), &empty_snapshot(ConnectionState::Connected));

        let queued = hub.publish(&OutboundMessage::AgentToolsClear { id: AgentId(1) });
        assert_eq!(queued, 0);
        assert_eq!(hub.len(), 1);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn test_detach() {
        let hub = BroadcastHub::new();
        let (observer, _rx) = ChannelObserver::new(16);
        let id = hub
            .attach(Arc::new(observer), &empty_snapshot(ConnectionState::Connected))
            .unwrap();

        assert!(hub.detach(id));
        assert!(!hub.detach(id));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_observer_closed_before_attach_is_not_added() {
        let hub = BroadcastHub::new();
        let (observer, rx) = ChannelObserver::new(16);
        drop(rx);
        let id = hub.attach(Arc::new(observer), &empty_snapshot(ConnectionState::Connected));
        assert!(id.is_none());
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_larger_than_queue_is_refused() {
        let hub = BroadcastHub::new();
        let snapshot = Snapshot {
            catalog: None,
            layout: None,
            roster: OutboundMessage::ExistingAgents {
                agents: vec![AgentId(1), AgentId(2)],
                meta: vec![],
            },
            replay: vec![
                OutboundMessage::AgentStatus {
                    id: AgentId(1),
                    status: ObservedStatus::Active,
                },
                OutboundMessage::AgentStatus {
                    id: AgentId(2),
                    status: ObservedStatus::Active,
                },
            ],
            connection: ConnectionState::Connected,
        };
        assert_eq!(snapshot.messages().len(), 5);

        let (small, mut rx) = ChannelObserver::new(3);
        assert_eq!(hub.attach(Arc::new(small), &snapshot), None);
        assert!(hub.is_empty());

        // Nothing published later reaches the refused observer.
        drain(&mut rx);
        hub.publish(&OutboundMessage::AgentToolsClear { id: AgentId(1) });
        assert!(rx.try_recv().is_err());

        let (roomy, mut rx) = ChannelObserver::new(5);
        assert!(hub.attach(Arc::new(roomy), &snapshot).is_some());
        let kinds: Vec<_> = drain(&mut rx).iter().map(|m| m.kind()).collect();
        assert_eq!(kinds.last(), Some(&"connectionStatus"));
        assert_eq!(kinds.len(), 5);
    }
}
