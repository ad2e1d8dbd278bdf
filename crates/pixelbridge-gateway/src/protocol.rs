//! Gateway wire frames.
//!
//! Every text frame is a JSON object with a `type` of `req`, `res` or
//! `event`. Requests carry a client-chosen `id` that the matching response
//! echoes back.

use pixelbridge_core::config::GatewayConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event announcing the handshake nonce.
pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";
/// Keepalive event, sent in both directions.
pub const EVENT_TICK: &str = "tick";
/// Agent lifecycle/tool stream.
pub const EVENT_AGENT_STREAM: &str = "agent.stream";
/// Older name for [`EVENT_AGENT_STREAM`].
pub const EVENT_AGENT: &str = "agent";
/// An exec call is waiting for an operator decision.
pub const EVENT_APPROVAL_REQUESTED: &str = "exec.approval.requested";
/// An exec approval was decided, possibly by another operator.
pub const EVENT_APPROVAL_RESOLVED: &str = "exec.approval.resolved";

/// Handshake request.
pub const METHOD_CONNECT: &str = "connect";
/// Presence announcement sent after connecting.
pub const METHOD_SYSTEM_PRESENCE: &str = "system-presence";
/// Decide a pending exec approval.
pub const METHOD_APPROVAL_RESOLVE: &str = "exec.approval.resolve";

/// A gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req(RequestFrame),
    Res(ResponseFrame),
    Event(EventFrame),
}

impl Frame {
    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client or server request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Create a request with parameters.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(default, alias = "result", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Successful response.
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Error body of a failed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorShape {
    /// Create an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    /// Create an event.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            seq: None,
        }
    }

    /// Create an event with no payload.
    pub fn bare(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: None,
            seq: None,
        }
    }
}

/// Payload of `connect.challenge`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectChallenge {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

impl ConnectParams {
    /// Build handshake parameters from the gateway settings.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ClientInfo::local(&config.client_id),
            role: config.role.clone(),
            scopes: config.scopes.clone(),
            auth: config
                .token
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| ConnectAuth {
                    token: t.expose_secret().to_string(),
                }),
        }
    }
}

/// Client identity announced during the handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl ClientInfo {
    /// Identity of this process.
    pub fn local(client_id: &str) -> Self {
        Self {
            id: client_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "backend".to_string(),
            instance_id: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }
}

/// Shared-secret auth.
#[derive(Clone, Serialize)]
pub struct ConnectAuth {
    pub token: String,
}

impl std::fmt::Debug for ConnectAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectAuth").field("token", &"[REDACTED]").finish()
    }
}

/// Successful `connect` response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub protocol: Option<u32>,
    #[serde(default)]
    pub policy: Policy,
}

/// Connection policy advertised in `hello-ok`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl HelloOk {
    /// Interpret the response to the `connect` request.
    ///
    /// Returns the reason the handshake failed if the response is not a
    /// successful `hello-ok`.
    pub fn from_response(res: &ResponseFrame) -> Result<Self, String> {
        if !res.ok {
            let err = res.error.clone().unwrap_or_default();
            return Err(format!("{}: {}", err.code, err.message));
        }
        let payload = res
            .payload
            .clone()
            .ok_or_else(|| "connect response has no payload".to_string())?;
        let hello: HelloOk =
            serde_json::from_value(payload).map_err(|e| format!("malformed hello: {}", e))?;
        if hello.kind != "hello-ok" {
            return Err(format!("unexpected handshake reply '{}'", hello.kind));
        }
        Ok(hello)
    }
}
