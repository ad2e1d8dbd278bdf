//! Bridge runtime.
//!
//! One task owns the [`EventTranslator`] and handles, in arrival order,
//! gateway events, connection state changes, and observer commands. Snapshot
//! replay for a new observer runs on the same task, so no translated delta
//! can slip in between an observer's snapshot and its first live message.
//! The asset catalog and layout are read once at startup and kept in memory,
//! so attaching never waits on disk.

use crate::assets::{AssetSource, LayoutStore, NoAssets};
use crate::error::ServerError;
use crate::hub::{BroadcastHub, Observer, ObserverId, Snapshot};
use crate::Result;
use pixelbridge_core::{ConnectionState, ObserverRequest, OutboundMessage};
use pixelbridge_gateway::protocol::{METHOD_APPROVAL_RESOLVE, METHOD_SYSTEM_PRESENCE};
use pixelbridge_gateway::{EventTranslator, GatewayConnection, GatewayEvent};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Decision sent upstream for an approved exec.
const DECISION_ALLOW: &str = "allow-once";
/// Decision sent upstream for a denied exec.
const DECISION_DENY: &str = "deny";

enum BridgeCommand {
    Attach {
        observer: Arc<dyn Observer>,
        reply: oneshot::Sender<Option<ObserverId>>,
    },
    Request(ObserverRequest),
    ApprovalSent {
        approval_id: String,
        approved: bool,
    },
    Shutdown,
}

/// Handle for talking to a running [`Bridge`]. Cheap to clone.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeCommand>,
    hub: Arc<BroadcastHub>,
    gateway: GatewayConnection,
}

impl BridgeHandle {
    /// Attach an observer. The snapshot is queued to it before this returns.
    ///
    /// Fails with [`ServerError::SnapshotRejected`] if the observer could not
    /// take the whole snapshot; it is not attached in that case.
    pub async fn attach(&self, observer: Arc<dyn Observer>) -> Result<ObserverId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCommand::Attach { observer, reply })
            .map_err(|_| ServerError::BridgeStopped)?;
        rx.await
            .map_err(|_| ServerError::BridgeStopped)?
            .ok_or(ServerError::SnapshotRejected)
    }

    /// Detach an observer.
    pub fn detach(&self, id: ObserverId) -> bool {
        self.hub.detach(id)
    }

    /// Forward an observer control message.
    pub fn forward(&self, request: ObserverRequest) -> Result<()> {
        self.tx
            .send(BridgeCommand::Request(request))
            .map_err(|_| ServerError::BridgeStopped)
    }

    /// Stop the runtime and disconnect from the gateway.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeCommand::Shutdown);
    }

    /// The observer fan-out.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// The upstream connection.
    pub fn gateway(&self) -> &GatewayConnection {
        &self.gateway
    }
}

/// The runtime wiring the gateway to observers.
pub struct Bridge {
    gateway: GatewayConnection,
    gateway_events: mpsc::UnboundedReceiver<GatewayEvent>,
    translator: EventTranslator,
    hub: Arc<BroadcastHub>,
    assets: Arc<dyn AssetSource>,
    layouts: Arc<dyn LayoutStore>,
    catalog: Option<Value>,
    layout: Option<Value>,
    connection: ConnectionState,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    handle: BridgeHandle,
}

impl Bridge {
    /// Create a bridge over a gateway connection and its event receiver.
    pub fn new(
        gateway: GatewayConnection,
        gateway_events: mpsc::UnboundedReceiver<GatewayEvent>,
    ) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let hub = Arc::new(BroadcastHub::new());
        let handle = BridgeHandle {
            tx,
            hub: hub.clone(),
            gateway: gateway.clone(),
        };
        Self {
            connection: gateway.state(),
            gateway,
            gateway_events,
            translator: EventTranslator::new(),
            hub,
            assets: Arc::new(NoAssets),
            layouts: Arc::new(NoAssets),
            catalog: None,
            layout: None,
            commands,
            handle,
        }
    }

    /// Use an asset catalog source.
    pub fn with_assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = assets;
        self
    }

    /// Use a layout store.
    pub fn with_layout_store(mut self, layouts: Arc<dyn LayoutStore>) -> Self {
        self.layouts = layouts;
        self
    }

    /// A handle to this bridge.
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Process events and commands until shut down.
    pub async fn run(mut self) {
        self.load_assets().await;
        info!("bridge runtime started");
        loop {
            tokio::select! {
                biased;
                event = self.gateway_events.recv() => match event {
                    Some(event) => self.on_gateway_event(event),
                    None => {
                        debug!("gateway event stream ended");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(BridgeCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }
        self.gateway.disconnect();
        info!(observers = self.hub.len(), "bridge runtime stopped");
    }

    fn on_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::State(state) => {
                self.connection = state;
                self.hub
                    .publish(&OutboundMessage::ConnectionStatus { status: state });
                if state == ConnectionState::Connected {
                    self.announce_presence();
                }
            }
            GatewayEvent::Event(frame) => {
                for message in self.translator.handle_event(&frame) {
                    trace!(kind = message.kind(), agent_id = ?message.agent_id(), "publishing");
                    self.hub.publish(&message);
                }
            }
        }
    }

    async fn on_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Attach { observer, reply } => {
                let id = self.hub.attach(observer, &self.snapshot());
                if let Some(id) = id {
                    info!(observer_id = id, agents = self.translator.len(), "observer ready");
                }
                let _ = reply.send(id);
            }
            BridgeCommand::Request(request) => self.on_request(request).await,
            BridgeCommand::ApprovalSent {
                approval_id,
                approved,
            } => {
                for message in self.translator.resolve_approval(&approval_id, approved) {
                    self.hub.publish(&message);
                }
            }
            BridgeCommand::Shutdown => {}
        }
    }

    async fn on_request(&mut self, request: ObserverRequest) {
        match request {
            ObserverRequest::ResolveApproval { id, approved } => {
                self.resolve_approval(id, approved)
            }
            ObserverRequest::SaveLayout { layout } => {
                match self.layouts.save_layout(&layout).await {
                    Ok(()) => self.layout = Some(layout),
                    Err(e) => warn!(error = %e, "failed to save layout"),
                }
            }
            ObserverRequest::Ready | ObserverRequest::Unknown => {
                trace!("ignoring observer request");
            }
        }
    }

    /// Send the decision upstream; local state clears only once the gateway accepts it.
    fn resolve_approval(&self, approval_id: String, approved: bool) {
        let gateway = self.gateway.clone();
        let tx = self.handle.tx.clone();
        tokio::spawn(async move {
            let decision = if approved { DECISION_ALLOW } else { DECISION_DENY };
            let params = json!({ "id": approval_id, "decision": decision });
            match gateway.request(METHOD_APPROVAL_RESOLVE, params).await {
                Ok(_) => {
                    debug!(approval_id = %approval_id, decision, "approval resolved upstream");
                    let _ = tx.send(BridgeCommand::ApprovalSent {
                        approval_id,
                        approved,
                    });
                }
                Err(e) => {
                    warn!(
                        approval_id = %approval_id,
                        decision,
                        error = %e,
                        "failed to resolve approval"
                    );
                }
            }
        });
    }

    fn announce_presence(&self) {
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let params = json!({
                "text": "pixelbridge observer bridge connected",
                "mode": "backend",
                "reason": "connect",
            });
            if let Err(e) = gateway.request(METHOD_SYSTEM_PRESENCE, params).await {
                warn!(error = %e, "system-presence request failed");
            }
        });
    }

    async fn load_assets(&mut self) {
        self.catalog = self.assets.load_catalog().await.unwrap_or_else(|e| {
            warn!(error = %e, "asset catalog unavailable");
            None
        });
        self.layout = self.layouts.load_layout().await.unwrap_or_else(|e| {
            warn!(error = %e, "layout unavailable, using default");
            None
        });
        debug!(
            catalog = self.catalog.is_some(),
            layout = self.layout.is_some(),
            "assets loaded"
        );
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            catalog: self.catalog.clone(),
            layout: self.layout.clone(),
            roster: self.translator.roster(),
            replay: self.translator.replay(),
            connection: self.connection,
        }
    }
}
