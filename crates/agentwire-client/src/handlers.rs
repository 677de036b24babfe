//! Handler traits for server-initiated requests.
//!
//! The protocol is bidirectional: once a session runs, the server calls
//! back into the client to execute registered tools and to ask for
//! permission decisions. Applications implement [`ToolHandler`] and
//! [`PermissionHandler`] (or wrap closures with [`tool_fn`] /
//! [`permission_fn`]) and attach them to a session before creating it.
//!
//! Handler failures never leak to the server as protocol faults: a failed
//! tool handler becomes a `failure` tool result, a failed or absent
//! permission handler becomes the default-deny decision.

use agentwire_protocol::types::{
    PermissionRequest, PermissionRequestResult, ToolInvocation, ToolResult,
};
use agentwire_protocol::SessionEvent;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors a handler may report.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The handler's own deadline expired.
    #[error("handler timed out after {timeout_seconds} seconds")]
    Timeout {
        /// Seconds the handler waited.
        timeout_seconds: u64,
    },

    /// The arguments did not match what the handler expects.
    #[error("invalid input: {details}")]
    InvalidInput {
        /// What was wrong.
        details: String,
    },

    /// Anything else.
    #[error("handler error: {message}")]
    Generic {
        /// What went wrong.
        message: String,
    },
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}

/// Executes one registered tool when the server invokes it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool and produces its result.
    async fn handle(&self, invocation: ToolInvocation) -> Result<ToolResult, HandlerError>;
}

/// Decides server-initiated permission requests.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    /// Produces a decision for the request.
    async fn handle(
        &self,
        request: PermissionRequest,
    ) -> Result<PermissionRequestResult, HandlerError>;
}

struct ToolFn<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for ToolFn<F>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolResult, HandlerError>> + Send,
{
    async fn handle(&self, invocation: ToolInvocation) -> Result<ToolResult, HandlerError> {
        (self.0)(invocation).await
    }
}

/// Wraps an async closure as a [`ToolHandler`].
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, HandlerError>> + Send + 'static,
{
    Arc::new(ToolFn(f))
}

struct PermissionFn<F>(F);

#[async_trait]
impl<F, Fut> PermissionHandler for PermissionFn<F>
where
    F: Fn(PermissionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PermissionRequestResult, HandlerError>> + Send,
{
    async fn handle(
        &self,
        request: PermissionRequest,
    ) -> Result<PermissionRequestResult, HandlerError> {
        (self.0)(request).await
    }
}

/// Wraps an async closure as a [`PermissionHandler`].
pub fn permission_fn<F, Fut>(f: F) -> Arc<dyn PermissionHandler>
where
    F: Fn(PermissionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionRequestResult, HandlerError>> + Send + 'static,
{
    Arc::new(PermissionFn(f))
}

/// Callback invoked for every event a session receives.
///
/// Called synchronously from the connection's routing task, so events
/// arrive in wire order; hand work off to a channel for anything slow.
pub type SessionEventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use agentwire_protocol::types::ToolResultType;
    use serde_json::json;

    #[tokio::test]
    async fn tool_fn_adapts_closures() {
        let handler = tool_fn(|invocation: ToolInvocation| async move {
            Ok(ToolResult::success(json!({"echo": invocation.tool_name})))
        });
        let result = handler
            .handle(ToolInvocation {
                session_id: "s-1".into(),
                tool_call_id: "c-1".into(),
                tool_name: "echo".into(),
                arguments: json!({}),
            })
            .await
            .unwrap();
        assert_eq!(result.result_type, ToolResultType::Success);
        assert_eq!(result.content.unwrap()["echo"], "echo");
    }

    #[tokio::test]
    async fn permission_fn_adapts_closures() {
        let handler =
            permission_fn(|_req: PermissionRequest| async { Ok(PermissionRequestResult::approved()) });
        let result = handler
            .handle(PermissionRequest {
                session_id: "s-1".into(),
                kind: agentwire_protocol::types::PermissionKind::Shell,
                tool_call_id: None,
                detail: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(
            result.kind,
            agentwire_protocol::types::PermissionDecision::Approved
        );
    }
}
