//! Observer-facing message vocabulary.
//!
//! Every message is a JSON object with a `type` discriminator. Existing kinds
//! keep their shape; observers ignore kinds they do not know.

use super::{AgentId, AgentStatus, ConnectionState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Activity reported to observers for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStatus {
    /// Running a task.
    Active,

    /// Finished its run, waiting for input.
    Waiting,
}

/// Roster entry inside `existingAgents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    pub id: AgentId,
    pub session_key: String,
    pub status: AgentStatus,
}

/// Message sent from the bridge to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// Full roster, sent once per attach.
    ExistingAgents {
        agents: Vec<AgentId>,
        #[serde(default)]
        meta: Vec<AgentMeta>,
    },

    /// A session was seen for the first time.
    AgentCreated { id: AgentId, session_key: String },

    /// Agent activity changed.
    AgentStatus { id: AgentId, status: ObservedStatus },

    /// A tool started running.
    AgentToolStart {
        id: AgentId,
        tool_id: String,
        status: String,
    },

    /// A tool finished.
    AgentToolDone { id: AgentId, tool_id: String },

    /// All tools of the agent's run are gone.
    AgentToolsClear { id: AgentId },

    /// The agent is blocked on an exec approval.
    AgentToolPermission {
        id: AgentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approval_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },

    /// The pending approval was granted.
    AgentToolPermissionClear { id: AgentId },

    /// The pending approval was denied.
    AgentToolPermissionDenied { id: AgentId },

    /// The agent's run failed.
    AgentError { id: AgentId, error: String },

    /// Upstream gateway connection state.
    ConnectionStatus { status: ConnectionState },

    /// Sprite/asset catalog from the asset loader.
    AssetCatalogLoaded { catalog: Value },

    /// Persisted office layout, or `null` for the built-in default.
    LayoutLoaded { layout: Option<Value> },
}

impl OutboundMessage {
    /// The `type` discriminator on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExistingAgents { .. } => "existingAgents",
            Self::AgentCreated { .. } => "agentCreated",
            Self::AgentStatus { .. } => "agentStatus",
            Self::AgentToolStart { .. } => "agentToolStart",
            Self::AgentToolDone { .. } => "agentToolDone",
            Self::AgentToolsClear { .. } => "agentToolsClear",
            Self::AgentToolPermission { .. } => "agentToolPermission",
            Self::AgentToolPermissionClear { .. } => "agentToolPermissionClear",
            Self::AgentToolPermissionDenied { .. } => "agentToolPermissionDenied",
            Self::AgentError { .. } => "agentError",
            Self::ConnectionStatus { .. } => "connectionStatus",
            Self::AssetCatalogLoaded { .. } => "assetCatalogLoaded",
            Self::LayoutLoaded { .. } => "layoutLoaded",
        }
    }

    /// The agent this message is about, if any.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::AgentCreated { id, .. }
            | Self::AgentStatus { id, .. }
            | Self::AgentToolStart { id, .. }
            | Self::AgentToolDone { id, .. }
            | Self::AgentToolsClear { id }
            | Self::AgentToolPermission { id, .. }
            | Self::AgentToolPermissionClear { id }
            | Self::AgentToolPermissionDenied { id }
            | Self::AgentError { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Control message sent from an observer to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ObserverRequest {
    /// First contact; triggers a snapshot replay.
    #[serde(alias = "webviewReady")]
    Ready,

    /// Approve or deny a pending exec approval.
    ResolveApproval { id: String, approved: bool },

    /// Persist the observer's layout.
    SaveLayout { layout: Value },

    /// Anything this bridge does not handle.
    #[serde(other)]
    Unknown,
}
