//! Frame wrapper crossing the transport boundary.
//!
//! Transports move opaque single-line frames; envelope decoding happens
//! above them, so a malformed frame can be counted and dropped without
//! the transport caring.

use bytes::Bytes;

/// One frame: the bytes of a single line, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Frame payload.
    pub payload: Bytes,
}

impl TransportMessage {
    /// Wraps payload bytes in a frame.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Frame size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Payload as UTF-8, if it is UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<String> for TransportMessage {
    fn from(line: String) -> Self {
        Self::new(Bytes::from(line))
    }
}

impl From<&str> for TransportMessage {
    fn from(line: &str) -> Self {
        Self::new(Bytes::copy_from_slice(line.as_bytes()))
    }
}
