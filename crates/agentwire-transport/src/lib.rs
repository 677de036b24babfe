//! # Agentwire Transport
//!
//! Byte pipes to the agent server. Two implementations of the
//! [`Transport`] trait:
//!
//! - [`ProcessTransport`]: spawn the server as a child process and frame
//!   newline-delimited JSON over its stdin/stdout.
//! - [`TcpClientTransport`]: attach to an already-running server over TCP
//!   with the same framing.
//!
//! Transports move opaque [`TransportMessage`] frames; envelope encoding
//! and decoding live in `agentwire-protocol` so framing faults and
//! protocol faults stay distinguishable.

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

pub mod endpoint;
pub mod error;
pub mod message;
pub mod stdio;
pub mod tcp;
pub mod traits;

pub use endpoint::ServerAddress;
pub use error::{TransportError, TransportResult};
pub use message::TransportMessage;
pub use stdio::{ProcessCommand, ProcessTransport};
pub use tcp::TcpClientTransport;
pub use traits::{Transport, TransportState};
