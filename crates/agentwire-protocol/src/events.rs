//! Typed session events.
//!
//! Event envelopes carry a string event name plus a JSON payload;
//! [`SessionEvent::from_envelope`] turns the names this SDK understands
//! into typed variants and everything else into [`SessionEvent::Unknown`],
//! so a newer server never breaks an older client.

use crate::types::{ConnectionState, SessionState};
use crate::wire::EventEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire names of the events this SDK understands.
pub mod names {
    /// Incremental assistant output.
    pub const ASSISTANT_MESSAGE_DELTA: &str = "assistant.message_delta";
    /// Incremental assistant reasoning output.
    pub const ASSISTANT_REASONING_DELTA: &str = "assistant.reasoning_delta";
    /// Complete assistant message; terminates the matching delta stream.
    pub const ASSISTANT_MESSAGE: &str = "assistant.message";
    /// The session finished processing its queue.
    pub const SESSION_IDLE: &str = "session.idle";
    /// Context compaction began.
    pub const COMPACTION_STARTED: &str = "session.compaction_started";
    /// Context compaction finished.
    pub const COMPACTION_COMPLETED: &str = "session.compaction_completed";
    /// The session reported a fault.
    pub const SESSION_ERROR: &str = "session.error";
}

/// Payload of a delta event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    /// Message the delta belongs to.
    pub message_id: String,
    /// The text fragment.
    pub delta_content: String,
}

/// Payload of a complete assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Message id, matching earlier deltas.
    pub message_id: String,
    /// Full message content.
    pub content: String,
}

/// Payload of a compaction-started event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionStartedPayload {
    /// Context buffer utilization that triggered compaction.
    pub utilization: f64,
    /// True when sends must wait for compaction to finish.
    #[serde(default)]
    pub blocking: bool,
}

/// Payload of a compaction-completed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionCompletedPayload {
    /// Context buffer utilization after compaction.
    pub utilization: f64,
}

/// An event delivered to session subscribers.
///
/// Wire events parse into the typed variants; `ConnectionChanged` and
/// `StateChanged` are synthesized locally by the lifecycle machinery.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// Incremental assistant output.
    MessageDelta(DeltaPayload),
    /// Incremental assistant reasoning output.
    ReasoningDelta(DeltaPayload),
    /// Complete assistant message.
    Message(MessagePayload),
    /// The session finished processing its queue.
    Idle,
    /// Context compaction began.
    CompactionStarted(CompactionStartedPayload),
    /// Context compaction finished.
    CompactionCompleted(CompactionCompletedPayload),
    /// The session reported a fault.
    SessionError {
        /// Server-provided description.
        message: String,
    },
    /// The connection to the server changed state.
    ConnectionChanged(ConnectionState),
    /// This session changed state.
    StateChanged(SessionState),
    /// An event this SDK version does not understand.
    Unknown {
        /// Wire event name.
        event: String,
        /// Raw payload.
        data: Value,
    },
}

impl SessionEvent {
    /// Parses a wire event envelope.
    ///
    /// Unknown event names become [`SessionEvent::Unknown`]; a known name
    /// with a payload that does not parse is an error the caller should
    /// log and drop.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        let data = envelope.data.clone();
        Ok(match envelope.event.as_str() {
            names::ASSISTANT_MESSAGE_DELTA => Self::MessageDelta(serde_json::from_value(data)?),
            names::ASSISTANT_REASONING_DELTA => Self::ReasoningDelta(serde_json::from_value(data)?),
            names::ASSISTANT_MESSAGE => Self::Message(serde_json::from_value(data)?),
            names::SESSION_IDLE => Self::Idle,
            names::COMPACTION_STARTED => Self::CompactionStarted(serde_json::from_value(data)?),
            names::COMPACTION_COMPLETED => Self::CompactionCompleted(serde_json::from_value(data)?),
            names::SESSION_ERROR => {
                #[derive(Deserialize)]
                struct ErrorPayload {
                    message: String,
                }
                let payload: ErrorPayload = serde_json::from_value(data)?;
                Self::SessionError {
                    message: payload.message,
                }
            }
            _ => Self::Unknown {
                event: envelope.event.clone(),
                data,
            },
        })
    }
}
