//! # Agentwire Protocol
//!
//! Wire envelopes, domain types, and session events for the agentwire
//! client SDK. This crate is pure data: no I/O, no runtime.
//!
//! ## Overview
//!
//! - **Wire model**: [`Envelope`] with its four frame kinds, plus
//!   [`decode_envelope`] / [`encode_envelope`] for newline-delimited JSON
//!   framing.
//! - **Domain types**: session configuration, tool and permission
//!   results, and typed replies for every client operation.
//! - **Events**: [`SessionEvent`] parsed from event envelopes.
//! - **Errors**: the SDK-wide [`Error`] / [`ErrorKind`] pair.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod error;
pub mod events;
pub mod types;
pub mod wire;

pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use events::SessionEvent;
pub use wire::{
    decode_envelope, encode_envelope, DecodeError, EncodeError, Envelope, ErrorEnvelope,
    EventEnvelope, RequestEnvelope, RequestId, ResponseEnvelope, WireError,
};

/// Protocol version this SDK speaks.
pub const PROTOCOL_VERSION: u32 = 1;
