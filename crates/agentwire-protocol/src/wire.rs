//! Wire envelope model.
//!
//! Every frame on the wire is one JSON object per line, discriminated by a
//! `"type"` field: `request`, `response`, `event`, or `error`. Requests and
//! responses carry an `id` used for correlation; events carry an event name
//! and, for session-scoped events, a `sessionId`. Error envelopes answer a
//! request when they carry an `id`, and describe a connection-level fault
//! when they do not.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error as ThisError;

/// Correlation id carried by request, response, and error envelopes.
///
/// Locally issued ids are numeric and monotonically increasing. Ids minted
/// by the server for its own requests may be numbers or strings and are
/// echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(u64),
    /// Opaque string id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A request envelope, sent by either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id; the reply echoes it.
    pub id: RequestId,
    /// Method name, e.g. `"session.send"`.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A successful reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Echoes the request's id.
    pub id: RequestId,
    /// Result payload.
    #[serde(default)]
    pub result: Value,
}

/// A server-emitted event, outside any request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Event name, e.g. `"assistant.message_delta"`.
    pub event: String,
    /// Owning session; absent for connection-global events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// Error detail inside an error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An error envelope: a failed reply when `id` is present, a
/// connection-level fault when it is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Id of the request this error answers, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// The error itself.
    pub error: WireError,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// A request (client- or server-initiated).
    Request(RequestEnvelope),
    /// A successful reply.
    Response(ResponseEnvelope),
    /// A server-emitted event.
    Event(EventEnvelope),
    /// A failed reply or connection-level fault.
    Error(ErrorEnvelope),
}

impl Envelope {
    /// Builds a request envelope.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(RequestEnvelope {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Builds a successful response envelope.
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(ResponseEnvelope { id, result })
    }

    /// Builds an event envelope.
    pub fn event(event: impl Into<String>, session_id: Option<String>, data: Value) -> Self {
        Self::Event(EventEnvelope {
            event: event.into(),
            session_id,
            data,
        })
    }

    /// Builds an error envelope answering `id`.
    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self::Error(ErrorEnvelope {
            id,
            error: WireError {
                code,
                message: message.into(),
                data: None,
            },
        })
    }
}

/// Why a frame failed to decode.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame is not valid JSON at all.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame is JSON but has no `"type"` discriminant.
    #[error("frame has no \"type\" field")]
    MissingType,

    /// The `"type"` value is not one the protocol defines.
    #[error("unrecognized envelope type {0:?}")]
    UnrecognizedType(String),

    /// The envelope is missing or mistypes a required field.
    #[error("malformed {envelope_type} envelope: {source}")]
    MalformedEnvelope {
        /// Which envelope type failed validation.
        envelope_type: &'static str,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Why an envelope failed to encode.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum EncodeError {
    /// Serialization itself failed.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The serialized form would break line framing.
    #[error("serialized envelope contains an embedded newline")]
    EmbeddedNewline,
}

/// Decodes one line into an [`Envelope`].
///
/// The decoder distinguishes non-JSON garbage, a missing discriminant, an
/// unknown discriminant, and a structurally invalid envelope, so callers
/// can log precisely and count failures.
pub fn decode_envelope(line: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(line).map_err(DecodeError::InvalidJson)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    let envelope_type: &'static str = match tag {
        "request" => "request",
        "response" => "response",
        "event" => "event",
        "error" => "error",
        other => return Err(DecodeError::UnrecognizedType(other.to_string())),
    };
    serde_json::from_value(value).map_err(|source| DecodeError::MalformedEnvelope {
        envelope_type,
        source,
    })
}

/// Encodes an [`Envelope`] as one line, without the trailing newline.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, EncodeError> {
    let line = serde_json::to_string(envelope)?;
    // serde_json escapes control characters, but guard the framing
    // invariant explicitly anyway.
    if line.contains('\n') {
        return Err(EncodeError::EmbeddedNewline);
    }
    Ok(line)
}

/// Method names the client sends.
pub mod methods {
    /// Liveness probe.
    pub const PING: &str = "ping";
    /// Server version and protocol information.
    pub const GET_STATUS: &str = "status.get";
    /// Authentication status of the running server.
    pub const GET_AUTH_STATUS: &str = "auth.getStatus";
    /// Models the server can run sessions with.
    pub const LIST_MODELS: &str = "models.list";
    /// Create a new session.
    pub const SESSION_CREATE: &str = "session.create";
    /// Resume a previously created session by id.
    pub const SESSION_RESUME: &str = "session.resume";
    /// Send a user message into a session.
    pub const SESSION_SEND: &str = "session.send";
    /// Enumerate sessions known to the server.
    pub const SESSION_LIST: &str = "session.list";
    /// Delete a session and its state.
    pub const SESSION_DELETE: &str = "session.delete";
    /// Best-effort notice that a pending request was abandoned.
    pub const REQUEST_CANCEL: &str = "request.cancel";
}

/// Error codes used in error envelopes.
pub mod codes {
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The params were malformed for the method.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The referenced session is not known to this side.
    pub const UNKNOWN_SESSION: i64 = -32001;
}

/// Method names the server sends (server-initiated requests).
pub mod server_methods {
    /// The model asked to invoke a client-registered tool.
    pub const TOOL_CALL: &str = "tool.call";
    /// The server needs a permission decision.
    pub const PERMISSION_REQUEST: &str = "permission.request";
}
