//! Wire shapes exchanged between the backend and its frontends.
//!
//! The backend talks to a frontend with envelopes:
//!
//! ```text
//! { "action": "query" | "cancel" | "call", "data": <payload> }
//! ```
//!
//! A frontend answers with commands:
//!
//! ```text
//! { "command": "callback" | "register", "data": <payload>, ... }
//! ```
//!
//! Whatever a transport delivers arrives wrapped as `{"content": {"data": ...}}`,
//! see [`wrap`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::messaging::QueryId;

/// Action names sent from the backend to a frontend.
pub mod action {
    /// Correlated request expecting one `callback`.
    pub const QUERY: &str = "query";
    /// Best-effort notice that a query is no longer awaited.
    pub const CANCEL: &str = "cancel";
    /// Fire-and-forget invocation of a frontend endpoint.
    pub const CALL: &str = "call";
}

/// Command names sent from a frontend to the backend.
pub mod command {
    /// Reply to a query.
    pub const CALLBACK: &str = "callback";
    /// A freshly displayed frontend announces its reverse target.
    pub const REGISTER: &str = "register";
}

/// Outbound message from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the receiver should do.
    pub action: String,
    /// Action specific payload.
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload.
    pub fn new<T: Serialize + ?Sized>(action: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            action: action.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Extract the envelope from a raw transport message.
    pub fn from_message(message: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(frame(message))
            .map_err(|e| ProtocolError::malformed("envelope", e))
    }
}

/// Inbound command frame from a frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name used for routing.
    pub command: String,
    /// Command payload; `null` when absent.
    #[serde(default)]
    pub data: Value,
    /// Any other field of the frame, e.g. `target` on `register`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    /// Build a command carrying `data`.
    pub fn new(command: &str, data: Value) -> Self {
        Self {
            command: command.to_string(),
            data,
            extra: Map::new(),
        }
    }

    /// Extract `content.data` from a raw transport message.
    ///
    /// A message without `content` or `data` decodes as an empty frame, which
    /// then fails for lack of a command.
    pub fn from_message(message: &Value) -> Result<Self, ProtocolError> {
        let frame = frame(message);
        if frame.get("command").map_or(true, Value::is_null) {
            return Err(ProtocolError::MissingCommand);
        }
        serde_json::from_value(frame).map_err(|e| ProtocolError::malformed("command", e))
    }

    /// Look up a frame field, preferring `data` over the top-level frame.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).or_else(|| self.extra.get(name))
    }
}

/// Wrap a payload the way a transport delivers it.
pub fn wrap(payload: Value) -> Value {
    serde_json::json!({ "content": { "data": payload } })
}

fn frame(message: &Value) -> Value {
    message
        .pointer("/content/data")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Payload of the `query` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Token the callback must echo.
    pub identifier: QueryId,
    /// Caller supplied payload.
    pub data: Value,
}

/// Payload of the `cancel` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// The query that is no longer awaited.
    pub identifier: QueryId,
}

/// Payload of the `call` action, also the `data` of a fan-out query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Component the endpoint lives on.
    pub target: String,
    /// Method to invoke.
    pub endpoint: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Payload of the `callback` command.
///
/// `value` distinguishes an explicit `null` from an absent field: a frontend
/// may legitimately answer with `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackReply {
    /// The query being answered.
    pub identifier: QueryId,
    /// Successful result.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    /// Error message raised by the frontend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackReply {
    /// A successful reply.
    pub fn value(identifier: QueryId, value: Value) -> Self {
        Self {
            identifier,
            value: Some(value),
            error: None,
        }
    }

    /// A failed reply.
    pub fn error(identifier: QueryId, error: impl Into<String>) -> Self {
        Self {
            identifier,
            value: None,
            error: Some(error.into()),
        }
    }
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Payload of the `register` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Name the backend must open to reach the frontend.
    pub target: String,
}

impl Registration {
    /// Create a registration event for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Read the registration out of a `register` command.
    pub fn from_command(command: &Command) -> Result<Self, ProtocolError> {
        let target = command
            .field("target")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed {
                what: "registration",
                message: "missing target".to_string(),
            })?;
        Ok(Self::new(target))
    }
}
