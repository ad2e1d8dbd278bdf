//! Gateway event to observer message translation.
//!
//! The translator owns all agent state. Each gateway session key maps to
//! one numeric [`AgentId`] for the life of the process; ids start at 1 and
//! are never reused.

use crate::protocol::{
    EventFrame, EVENT_AGENT, EVENT_AGENT_STREAM, EVENT_APPROVAL_REQUESTED, EVENT_APPROVAL_RESOLVED,
};
use pixelbridge_core::tool_status::format_tool_status;
use pixelbridge_core::{
    AgentId, AgentMeta, AgentStatus, ObservedStatus, OutboundMessage, TrackedAgent, TrackedTool,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentStreamPayload {
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    stream: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct LifecycleData {
    phase: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolData {
    phase: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "toolUseId", alias = "id")]
    tool_call_id: Option<String>,
    #[serde(default, alias = "input")]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalDetails {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalRequested {
    id: String,
    #[serde(default)]
    request: ApprovalDetails,
    #[serde(default)]
    session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApprovalResolved {
    id: String,
    #[serde(default)]
    decision: Option<String>,
}

/// An approval waiting for an operator decision.
#[derive(Debug, Clone)]
struct PendingApproval {
    agent: AgentId,
    command: Option<String>,
}

/// Stateful translator from gateway events to observer messages.
#[derive(Debug)]
pub struct EventTranslator {
    next_id: AgentId,
    sessions: HashMap<String, AgentId>,
    agents: BTreeMap<AgentId, TrackedAgent>,
    approvals: HashMap<String, PendingApproval>,
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTranslator {
    /// Create a translator with no agents.
    pub fn new() -> Self {
        Self {
            next_id: AgentId::FIRST,
            sessions: HashMap::new(),
            agents: BTreeMap::new(),
            approvals: HashMap::new(),
        }
    }

    /// Translate one gateway event.
    pub fn handle_event(&mut self, event: &EventFrame) -> Vec<OutboundMessage> {
        let payload = event.payload.clone().unwrap_or(Value::Null);
        match event.event.as_str() {
            EVENT_AGENT_STREAM | EVENT_AGENT => self.on_agent_stream(payload),
            EVENT_APPROVAL_REQUESTED => self.on_approval_requested(payload),
            EVENT_APPROVAL_RESOLVED => self.on_approval_resolved(payload),
            other => {
                trace!(event = other, "ignoring gateway event");
                Vec::new()
            }
        }
    }

    /// Apply an operator decision for a pending approval.
    ///
    /// Approval emits `agentToolPermissionClear`; denial emits
    /// `agentToolPermissionDenied`. Either way the agent returns to busy.
    pub fn resolve_approval(&mut self, approval_id: &str, approved: bool) -> Vec<OutboundMessage> {
        let Some(id) = self.approvals.remove(approval_id).map(|p| p.agent) else {
            debug!(approval_id, "approval not pending");
            return Vec::new();
        };
        let Some(agent) = self.agents.get_mut(&id) else {
            return Vec::new();
        };

        if let Some(tool) = agent.waiting_tool_mut() {
            tool.permission_wait = false;
        }
        if agent.status == AgentStatus::WaitingApproval {
            agent.status = AgentStatus::Busy;
        }

        debug!(agent = %id, approval_id, approved, "approval resolved");
        if approved {
            vec![OutboundMessage::AgentToolPermissionClear { id }]
        } else {
            vec![OutboundMessage::AgentToolPermissionDenied { id }]
        }
    }

    /// Whether `approval_id` is still waiting for a decision.
    pub fn has_pending_approval(&self, approval_id: &str) -> bool {
        self.approvals.contains_key(approval_id)
    }

    /// The `existingAgents` roster, ordered by id.
    pub fn roster(&self) -> OutboundMessage {
        OutboundMessage::ExistingAgents {
            agents: self.agents.keys().copied().collect(),
            meta: self
                .agents
                .values()
                .map(|a| AgentMeta {
                    id: a.id,
                    session_key: a.session_key.clone(),
                    status: a.status,
                })
                .collect(),
        }
    }

    /// Status replay for agents that are mid-run or failed.
    ///
    /// Open tools are replayed as starts; completed tools are never sent.
    pub fn replay(&self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        for agent in self.agents.values() {
            let id = agent.id;
            match agent.status {
                AgentStatus::Idle => continue,
                AgentStatus::Busy | AgentStatus::WaitingApproval => {
                    out.push(OutboundMessage::AgentStatus {
                        id,
                        status: ObservedStatus::Active,
                    });
                }
                AgentStatus::Error => {
                    out.push(OutboundMessage::AgentError {
                        id,
                        error: agent
                            .last_error
                            .clone()
                            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
                    });
                }
            }

            out.extend(agent.open_tools().map(|tool| OutboundMessage::AgentToolStart {
                id,
                tool_id: tool.tool_id.clone(),
                status: tool.status.clone(),
            }));

            if agent.status == AgentStatus::WaitingApproval {
                let pending = self.approvals.iter().find(|(_, p)| p.agent == id);
                out.push(OutboundMessage::AgentToolPermission {
                    id,
                    approval_id: pending.map(|(approval_id, _)| approval_id.clone()),
                    command: pending.and_then(|(_, p)| p.command.clone()),
                });
            }
        }
        out
    }

    /// Look up an agent.
    pub fn agent(&self, id: AgentId) -> Option<&TrackedAgent> {
        self.agents.get(&id)
    }

    /// Agent bound to a session key.
    pub fn agent_for_session(&self, session_key: &str) -> Option<&TrackedAgent> {
        self.sessions
            .get(session_key)
            .and_then(|id| self.agents.get(id))
    }

    /// All agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &TrackedAgent> {
        self.agents.values()
    }

    /// Number of known agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn on_agent_stream(&mut self, payload: Value) -> Vec<OutboundMessage> {
        let payload: AgentStreamPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed agent stream payload");
                return Vec::new();
            }
        };
        let Some(session_key) = payload.session_key.filter(|k| !k.is_empty()) else {
            debug!(stream = %payload.stream, "agent event without session key");
            return Vec::new();
        };

        match payload.stream.as_str() {
            "lifecycle" => match serde_json::from_value::<LifecycleData>(payload.data) {
                Ok(data) => self.on_lifecycle(&session_key, payload.run_id, data),
                Err(e) => {
                    warn!(error = %e, "malformed lifecycle event");
                    Vec::new()
                }
            },
            "tool" => match serde_json::from_value::<ToolData>(payload.data) {
                Ok(data) => self.on_tool(&session_key, data),
                Err(e) => {
                    warn!(error = %e, "malformed tool event");
                    Vec::new()
                }
            },
            other => {
                trace!(stream = other, "ignoring agent stream");
                Vec::new()
            }
        }
    }

    fn on_lifecycle(
        &mut self,
        session_key: &str,
        run_id: Option<String>,
        data: LifecycleData,
    ) -> Vec<OutboundMessage> {
        match data.phase.as_str() {
            "start" => self.on_run_start(session_key, run_id),
            "end" => {
                let Some(id) = self.known(session_key) else {
                    return Vec::new();
                };
                self.forget_approvals(id);
                let Some(agent) = self.agents.get_mut(&id) else {
                    return Vec::new();
                };
                agent.status = AgentStatus::Idle;
                agent.current_run_id = None;
                for tool in agent.tool_history.iter_mut().filter(|t| !t.done) {
                    tool.complete();
                }
                vec![
                    OutboundMessage::AgentToolsClear { id },
                    OutboundMessage::AgentStatus {
                        id,
                        status: ObservedStatus::Waiting,
                    },
                ]
            }
            "error" => {
                let Some(id) = self.known(session_key) else {
                    return Vec::new();
                };
                self.forget_approvals(id);
                let Some(agent) = self.agents.get_mut(&id) else {
                    return Vec::new();
                };
                let error = data
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                agent.status = AgentStatus::Error;
                agent.current_run_id = None;
                agent.last_error = Some(error.clone());
                for tool in agent.tool_history.iter_mut() {
                    tool.permission_wait = false;
                }
                vec![OutboundMessage::AgentError { id, error }]
            }
            other => {
                trace!(phase = other, "ignoring lifecycle phase");
                Vec::new()
            }
        }
    }

    fn on_run_start(&mut self, session_key: &str, run_id: Option<String>) -> Vec<OutboundMessage> {
        if let Some(&id) = self.sessions.get(session_key) {
            self.forget_approvals(id);
            let Some(agent) = self.agents.get_mut(&id) else {
                return Vec::new();
            };
            let had_open_tools = agent.open_tools().next().is_some();
            agent.start_run(run_id);

            let mut out = Vec::new();
            if had_open_tools {
                out.push(OutboundMessage::AgentToolsClear { id });
            }
            out.push(OutboundMessage::AgentStatus {
                id,
                status: ObservedStatus::Active,
            });
            return out;
        }

        let id = self.next_id;
        self.next_id = id.next();
        self.sessions.insert(session_key.to_string(), id);
        self.agents
            .insert(id, TrackedAgent::new(id, session_key, run_id));
        debug!(agent = %id, session_key, "tracking new agent");

        vec![
            OutboundMessage::AgentCreated {
                id,
                session_key: session_key.to_string(),
            },
            OutboundMessage::AgentStatus {
                id,
                status: ObservedStatus::Active,
            },
        ]
    }

    fn on_tool(&mut self, session_key: &str, data: ToolData) -> Vec<OutboundMessage> {
        let Some(id) = self.known(session_key) else {
            return Vec::new();
        };
        let Some(tool_id) = data.tool_call_id.filter(|t| !t.is_empty()) else {
            debug!(agent = %id, phase = %data.phase, "tool event without tool id");
            return Vec::new();
        };
        let Some(agent) = self.agents.get_mut(&id) else {
            return Vec::new();
        };

        match data.phase.as_str() {
            "start" => {
                if agent.tool_mut(&tool_id).is_some() {
                    debug!(agent = %id, tool_id = %tool_id, "duplicate tool start");
                    return Vec::new();
                }
                let name = data.name.unwrap_or_else(|| "tool".to_string());
                let status = format_tool_status(&name, &data.args);
                agent
                    .tool_history
                    .push(TrackedTool::started(tool_id.clone(), name, status.clone()));
                vec![OutboundMessage::AgentToolStart {
                    id,
                    tool_id,
                    status,
                }]
            }
            "result" | "end" => match agent.tool_mut(&tool_id) {
                Some(tool) if !tool.done => {
                    tool.complete();
                    vec![OutboundMessage::AgentToolDone { id, tool_id }]
                }
                Some(_) => Vec::new(),
                None => {
                    debug!(agent = %id, tool_id = %tool_id, "result for unknown tool");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        }
    }

    fn on_approval_requested(&mut self, payload: Value) -> Vec<OutboundMessage> {
        let request: ApprovalRequested = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed approval request");
                return Vec::new();
            }
        };
        let session_key = request
            .request
            .session_key
            .or(request.session_key)
            .unwrap_or_default();
        let Some(id) = self.known(&session_key) else {
            return Vec::new();
        };

        // One outstanding approval per agent.
        self.forget_approvals(id);
        let Some(agent) = self.agents.get_mut(&id) else {
            return Vec::new();
        };
        if let Some(tool) = agent.waiting_tool_mut() {
            tool.permission_wait = false;
        }
        if let Some(tool) = agent.latest_open_tool_mut() {
            tool.permission_wait = true;
        }
        agent.status = AgentStatus::WaitingApproval;
        let command = request.request.command;
        self.approvals.insert(
            request.id.clone(),
            PendingApproval {
                agent: id,
                command: command.clone(),
            },
        );

        debug!(agent = %id, approval_id = %request.id, "approval requested");
        vec![OutboundMessage::AgentToolPermission {
            id,
            approval_id: Some(request.id),
            command,
        }]
    }

    fn on_approval_resolved(&mut self, payload: Value) -> Vec<OutboundMessage> {
        let resolved: ApprovalResolved = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed approval resolution");
                return Vec::new();
            }
        };
        let approved = resolved.decision.as_deref() != Some("deny");
        self.resolve_approval(&resolved.id, approved)
    }

    fn known(&self, session_key: &str) -> Option<AgentId> {
        let id = self.sessions.get(session_key).copied();
        if id.is_none() {
            debug!(session_key, "event for unknown session");
        }
        id
    }

    fn forget_approvals(&mut self, id: AgentId) {
        self.approvals.retain(|_, pending| pending.agent != id);
    }
}
