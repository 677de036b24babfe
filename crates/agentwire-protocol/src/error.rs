//! Unified error type for the SDK.
//!
//! Everything above the transport seam reports failures through [`Error`]:
//! a coarse [`ErrorKind`] for programmatic matching, a human-readable
//! message, and optional structured context (the operation, session, or
//! request the failure belongs to).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Result alias used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid options or session configuration, caught before any I/O.
    Configuration,
    /// The peer sent something the protocol does not allow.
    Protocol,
    /// A payload could not be serialized or deserialized.
    Serialization,
    /// The byte pipe to the server failed.
    Transport,
    /// The connection is not in a state that permits the operation.
    Connection,
    /// A reply could not be matched to an outstanding request.
    Correlation,
    /// An operation did not complete within its deadline.
    Timeout,
    /// A registered tool or permission handler failed.
    Handler,
    /// A session-level fault (unknown session, session failed).
    Session,
    /// The caller cancelled the operation.
    Cancelled,
    /// The server answered with an error envelope.
    Server,
    /// Anything that does not fit the kinds above.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Protocol => "protocol",
            Self::Serialization => "serialization",
            Self::Transport => "transport",
            Self::Connection => "connection",
            Self::Correlation => "correlation",
            Self::Timeout => "timeout",
            Self::Handler => "handler",
            Self::Session => "session",
            Self::Cancelled => "cancelled",
            Self::Server => "server",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured context attached to an [`Error`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The high-level operation that failed ("session.send", "connect").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Session the failure belongs to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Error code reported by the server, when the server produced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Free-form extra details.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub details: HashMap<String, serde_json::Value>,
}

/// The SDK's error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// Coarse classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Configuration error, raised before any I/O happens.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Protocol violation by the peer.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Serialization or deserialization failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    /// Transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Connection is absent or in the wrong state.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Reply/request correlation failure.
    pub fn correlation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Correlation, message)
    }

    /// Deadline expired.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A registered handler failed.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Session-level fault.
    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    /// The caller cancelled the operation.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// The server answered with an error envelope.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message).with_code(code)
    }

    /// Unclassified internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches the operation name to the error context.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(ErrorContext::default)
            .operation = Some(operation.into());
        self
    }

    /// Attaches a session id to the error context.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(ErrorContext::default)
            .session_id = Some(session_id.into());
        self
    }

    /// Attaches a server error code to the error context.
    #[must_use]
    pub fn with_code(mut self, code: i64) -> Self {
        self.context.get_or_insert_with(ErrorContext::default).code = Some(code);
        self
    }

    /// Attaches an arbitrary detail to the error context.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context
            .get_or_insert_with(ErrorContext::default)
            .details
            .insert(key.into(), value);
        self
    }

    /// True when the error came from a server error envelope.
    pub fn is_server_error(&self) -> bool {
        self.kind == ErrorKind::Server
    }

    /// Server error code, when the server reported one.
    pub fn server_code(&self) -> Option<i64> {
        self.context.as_ref().and_then(|c| c.code)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ctx) = &self.context {
            if let Some(op) = &ctx.operation {
                write!(f, " (operation: {op})")?;
            }
            if let Some(sid) = &ctx.session_id {
                write!(f, " (session: {sid})")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
