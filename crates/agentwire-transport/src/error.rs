//! Transport error types.

use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors produced at the transport seam.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be read.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be serialized or framed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The transport was configured with invalid parameters.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The transport is not in a state that permits the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The spawned server process failed.
    #[error("process error: {0}")]
    ProcessError(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("internal transport error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<TransportError> for agentwire_protocol::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConfigurationError(msg) => agentwire_protocol::Error::configuration(msg),
            TransportError::SerializationFailed(msg) => {
                agentwire_protocol::Error::serialization(msg)
            }
            TransportError::ConnectionFailed(_)
            | TransportError::ConnectionLost(_)
            | TransportError::InvalidState(_) => {
                agentwire_protocol::Error::connection(err.to_string())
            }
            other => agentwire_protocol::Error::transport(other.to_string()),
        }
    }
}
