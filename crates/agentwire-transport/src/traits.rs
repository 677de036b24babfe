//! The transport abstraction.

use crate::error::TransportResult;
use crate::message::TransportMessage;
use async_trait::async_trait;
use std::fmt;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Up and usable.
    Connected,
    /// Graceful shutdown in flight.
    Disconnecting,
    /// Broken; `reason` says why.
    Failed {
        /// Why the transport failed.
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A byte pipe to the agent server carrying newline-delimited frames.
///
/// Implementations must serialize concurrent `send` calls internally so
/// frames never interleave, and must keep `receive` usable by exactly one
/// consumer (the connection's routing task).
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Current lifecycle state.
    async fn state(&self) -> TransportState;

    /// Establishes the connection. Idempotent when already connected.
    async fn connect(&self) -> TransportResult<()>;

    /// Tears the connection down and releases resources.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Writes one frame. The implementation appends the newline.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Reads the next frame. `Ok(None)` means the peer closed cleanly;
    /// an error means the pipe broke.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> String;
}
