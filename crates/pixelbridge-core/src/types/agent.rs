//! Tracked agent and tool state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric agent handle assigned by the bridge.
///
/// Ids start at 1 and are never reused for a different session while the
/// process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl AgentId {
    /// The first id handed out.
    pub const FIRST: AgentId = AgentId(1);

    /// The id that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AgentId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Status of a tracked agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Between runs.
    #[default]
    Idle,

    /// A run is in progress.
    Busy,

    /// The last run failed.
    Error,

    /// Blocked on an exec approval.
    WaitingApproval,
}

/// One tool invocation inside an agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTool {
    /// Gateway tool call id.
    pub tool_id: String,

    /// Declared tool name.
    pub name: String,

    /// Human-readable status line.
    pub status: String,

    /// When the tool started.
    pub started_at: DateTime<Utc>,

    /// When the tool finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Whether the tool has finished.
    pub done: bool,

    /// Whether the tool is blocked on an approval.
    pub permission_wait: bool,
}

impl TrackedTool {
    /// Create a running tool entry.
    pub fn started(
        tool_id: impl Into<String>,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            status: status.into(),
            started_at: Utc::now(),
            completed_at: None,
            done: false,
            permission_wait: false,
        }
    }

    /// Mark the tool as finished.
    pub fn complete(&mut self) {
        self.done = true;
        self.permission_wait = false;
        self.completed_at = Some(Utc::now());
    }
}

/// An agent known to the bridge, keyed by its gateway session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAgent {
    /// Bridge-assigned id.
    pub id: AgentId,

    /// Gateway session key.
    pub session_key: String,

    /// Current status.
    pub status: AgentStatus,

    /// Id of the run in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<String>,

    /// Tools of the current run, in start order.
    #[serde(default)]
    pub tool_history: Vec<TrackedTool>,

    /// Message of the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the agent was first seen.
    pub created_at: DateTime<Utc>,
}

impl TrackedAgent {
    /// Create an agent for a freshly started run.
    pub fn new(id: AgentId, session_key: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            id,
            session_key: session_key.into(),
            status: AgentStatus::Busy,
            current_run_id: run_id,
            tool_history: Vec::new(),
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Begin a new run on an existing agent.
    pub fn start_run(&mut self, run_id: Option<String>) {
        self.status = AgentStatus::Busy;
        self.current_run_id = run_id;
        self.tool_history.clear();
        self.last_error = None;
    }

    /// Tools that have not finished yet.
    pub fn open_tools(&self) -> impl Iterator<Item = &TrackedTool> {
        self.tool_history.iter().filter(|t| !t.done)
    }

    /// Find a tool by id.
    pub fn tool_mut(&mut self, tool_id: &str) -> Option<&mut TrackedTool> {
        self.tool_history.iter_mut().find(|t| t.tool_id == tool_id)
    }

    /// The open tool currently blocked on an approval, if any.
    pub fn waiting_tool_mut(&mut self) -> Option<&mut TrackedTool> {
        self.tool_history
            .iter_mut()
            .find(|t| !t.done && t.permission_wait)
    }

    /// Most recently started tool that is still open.
    pub fn latest_open_tool_mut(&mut self) -> Option<&mut TrackedTool> {
        self.tool_history.iter_mut().rev().find(|t| !t.done)
    }
}
