//! # Agentwire Client
//!
//! Client SDK for driving a long-lived agent server over newline-delimited
//! JSON, either on the stdio of a spawned child process or over TCP.
//!
//! The entry point is [`Client`]: configure it with [`ClientOptions`],
//! create sessions with [`Client::create_session`], and stream assistant
//! output through per-session event handlers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use agentwire_client::types::MessageOptions;
//! use agentwire_client::{Client, ClientOptions, SessionOptions};
//!
//! # async fn run() -> agentwire_protocol::Result<()> {
//! let client = Client::new(ClientOptions::default())?;
//! client.connect().await?;
//!
//! let session = client
//!     .create_session(SessionOptions::with_model("claude-sonnet-4.5"))
//!     .await?;
//! session.on_event(std::sync::Arc::new(|event| {
//!     println!("{event:?}");
//! }));
//! session.send_message(MessageOptions::prompt("hello")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Client`] owns the connection lifecycle: spawn or dial, health
//!   checks, restart with backoff, and session resume after a restart.
//! - [`Session`] is a cheap handle onto shared session state; deltas are
//!   assembled per message and handlers observe events in arrival order.
//! - Tool and permission callbacks ([`ToolHandler`], [`PermissionHandler`])
//!   answer server-initiated requests; every request gets exactly one
//!   reply even when no handler is registered.

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

mod client;
mod connection;
mod dispatcher;
mod handlers;
mod options;
mod rpc;
mod session;

pub use client::{Client, StopError};
pub use connection::TransportFactory;
pub use handlers::{
    permission_fn, tool_fn, HandlerError, PermissionHandler, SessionEventHandler, ToolHandler,
};
pub use options::{ClientOptions, TransportTarget};
pub use session::{EventSubscription, ResumeOptions, Session, SessionOptions};

pub use agentwire_protocol::{self as protocol, Error, ErrorKind, Result, SessionEvent};

/// Commonly used protocol types, re-exported for convenience.
pub mod types {
    pub use agentwire_protocol::types::{
        Attachment, AttachmentKind, ConnectionState, GetAuthStatusResponse, GetStatusResponse,
        InfiniteSessionConfig, LogLevel, MessageMode, MessageOptions, ModelInfo,
        PermissionDecision, PermissionKind, PermissionRequest, PermissionRequestResult,
        PingResponse, ResumeSessionConfig, SessionConfig, SessionCreateResponse, SessionMetadata,
        SessionSendResponse, SessionState, Tool, ToolInvocation, ToolResult, ToolResultType,
    };
}
