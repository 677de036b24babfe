//! The client facade.
//!
//! [`Client`] is a cheap-clone handle over shared state: the correlation
//! dispatcher, the connection lifecycle manager, and the session map.
//! Construction validates the options and wires everything together
//! without doing any I/O; with `auto_start` (the default) the first
//! operation connects lazily, otherwise [`Client::connect`] is explicit.

use crate::connection::{ConnectionManager, LifecycleConfig, TransportFactory};
use crate::dispatcher::Dispatcher;
use crate::options::{ClientOptions, TransportTarget};
use crate::rpc::{RpcClient, TransportSlot};
use crate::session::{ResumeOptions, Session, SessionInner, SessionOptions};
use agentwire_protocol::events::SessionEvent;
use agentwire_protocol::types::{
    ConnectionState, GetAuthStatusResponse, GetStatusResponse, ModelInfo, PermissionRequest,
    PermissionRequestResult, PingResponse, ResumeSessionConfig, SessionCreateResponse,
    SessionMetadata, SessionState, ToolInvocation, ToolResult,
};
use agentwire_protocol::wire::{codes, methods, server_methods, Envelope, RequestEnvelope};
use agentwire_protocol::{Error, Result};
use agentwire_transport::{ProcessTransport, TcpClientTransport, Transport};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

/// Errors collected while stopping the client.
#[derive(Debug, thiserror::Error)]
#[error("shutdown completed with {} error(s)", .errors.len())]
pub struct StopError {
    /// Every fault hit during teardown, in order.
    pub errors: Vec<Error>,
}

/// Client for a long-lived agent server.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    rpc: Arc<RpcClient>,
    connection: Arc<ConnectionManager>,
    sessions: StdMutex<HashMap<String, Arc<SessionInner>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInner")
            .field("state", &self.connection.state())
            .field(
                "sessions",
                &self
                    .sessions
                    .lock()
                    .map(|s| s.len())
                    .unwrap_or_default(),
            )
            .finish_non_exhaustive()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.connection.shutdown_sync();
    }
}

impl Client {
    /// Builds a client from options, validating them up front. No I/O
    /// happens here.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let target = options.resolve_target()?;
        let factory: TransportFactory = Arc::new(move || {
            let target = target.clone();
            Box::pin(async move {
                Ok(match target {
                    TransportTarget::Stdio(command) => {
                        Arc::new(ProcessTransport::spawn(command)) as Arc<dyn Transport>
                    }
                    TransportTarget::Tcp(address) => {
                        Arc::new(TcpClientTransport::new(address)) as Arc<dyn Transport>
                    }
                })
            })
        });
        Self::with_transport_factory(options, factory)
    }

    /// Builds a client over a caller-supplied transport factory.
    ///
    /// The factory runs at connect time and again on every restart
    /// attempt. Intended for tests and for embedding the server behind a
    /// custom pipe.
    pub fn with_transport_factory(
        options: ClientOptions,
        factory: TransportFactory,
    ) -> Result<Self> {
        // Surface option conflicts even when the factory replaces the
        // built-in transports.
        options.resolve_target()?;

        let dispatcher = Arc::new(Dispatcher::new());
        let slot: TransportSlot = Arc::new(RwLock::new(None));
        let rpc = Arc::new(RpcClient::new(
            Arc::clone(&dispatcher),
            Arc::clone(&slot),
            options.request_timeout,
        ));
        let connection = ConnectionManager::new(
            factory,
            slot,
            Arc::clone(&dispatcher),
            Arc::clone(&rpc),
            LifecycleConfig {
                ping_interval: options.ping_interval,
                ping_timeout: options.ping_timeout,
                auto_restart: options.auto_restart,
                restart_attempts: options.restart_attempts,
                restart_backoff: options.restart_backoff,
            },
        );

        let inner = Arc::new(ClientInner {
            options,
            rpc,
            connection: Arc::clone(&connection),
            sessions: StdMutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        {
            let weak = weak.clone();
            dispatcher.set_request_handler(Arc::new(move |request| {
                let Some(inner) = weak.upgrade() else { return };
                // Handler work must not block the routing task.
                tokio::spawn(async move {
                    ClientInner::handle_server_request(&inner, request).await;
                });
            }));
        }
        {
            let weak = weak.clone();
            dispatcher.set_event_handler(Arc::new(move |envelope| {
                let Some(inner) = weak.upgrade() else { return };
                inner.route_event(envelope);
            }));
        }
        {
            let notify_weak = weak.clone();
            let resume_weak = weak.clone();
            let fail_weak = weak;
            connection.set_session_hooks(
                Arc::new(move |state| {
                    if let Some(inner) = notify_weak.upgrade() {
                        inner.broadcast(&SessionEvent::ConnectionChanged(state));
                    }
                }),
                Arc::new(move || {
                    let weak = resume_weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.resume_all_sessions().await;
                        }
                    })
                }),
                Arc::new(move |reason| {
                    if let Some(inner) = fail_weak.upgrade() {
                        inner.fail_all_sessions(&reason);
                    }
                }),
            );
        }

        Ok(Self { inner })
    }

    /// Connects now, spawning or dialing the server.
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_not_stopped()?;
        self.inner.connection.connect().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watches connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Liveness probe.
    pub async fn ping(&self, message: Option<String>) -> Result<PingResponse> {
        self.inner.ensure_connected().await?;
        let value = self
            .inner
            .rpc
            .issue(methods::PING, Some(json!({ "message": message })))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Server version and protocol information.
    pub async fn get_status(&self) -> Result<GetStatusResponse> {
        self.inner.ensure_connected().await?;
        let value = self.inner.rpc.issue(methods::GET_STATUS, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Authentication status of the running server.
    pub async fn get_auth_status(&self) -> Result<GetAuthStatusResponse> {
        self.inner.ensure_connected().await?;
        let value = self.inner.rpc.issue(methods::GET_AUTH_STATUS, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Models the server can run sessions with.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.inner.ensure_connected().await?;
        let value = self.inner.rpc.issue(methods::LIST_MODELS, None).await?;
        #[derive(Deserialize)]
        struct Payload {
            models: Vec<ModelInfo>,
        }
        let payload: Payload = serde_json::from_value(value)?;
        Ok(payload.models)
    }

    /// Sessions known to the server.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        self.inner.ensure_connected().await?;
        let value = self.inner.rpc.issue(methods::SESSION_LIST, None).await?;
        #[derive(Deserialize)]
        struct Payload {
            sessions: Vec<SessionMetadata>,
        }
        let payload: Payload = serde_json::from_value(value)?;
        Ok(payload.sessions)
    }

    /// Creates a session.
    pub async fn create_session(&self, options: SessionOptions) -> Result<Session> {
        options.config.validate()?;
        self.inner.ensure_connected().await?;

        let params = serde_json::to_value(&options.config)?;
        let value = self
            .inner
            .rpc
            .issue(methods::SESSION_CREATE, Some(params))
            .await?;
        let response: SessionCreateResponse = serde_json::from_value(value)?;

        let resume_config = ResumeSessionConfig {
            tools: options.config.tools.clone(),
            streaming: options.config.streaming,
            provider: options.config.provider.clone(),
            infinite_sessions: options.config.infinite_sessions.clone(),
        };
        let inner = Arc::new(SessionInner::new(
            response.session_id.clone(),
            options.tool_handlers,
            options.permission_handler,
            resume_config,
        ));
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(response.session_id, Arc::clone(&inner));
        Ok(Session::new(inner, Arc::clone(&self.inner.rpc)))
    }

    /// Resumes a session by id, re-registering tools and handlers.
    pub async fn resume_session(
        &self,
        session_id: impl Into<String>,
        options: ResumeOptions,
    ) -> Result<Session> {
        let session_id = session_id.into();
        if session_id.is_empty() {
            return Err(Error::configuration("session id must not be empty"));
        }
        options.config.validate()?;
        self.inner.ensure_connected().await?;

        let mut params = serde_json::to_value(&options.config)?;
        params["sessionId"] = serde_json::Value::String(session_id.clone());
        let value = self
            .inner
            .rpc
            .issue(methods::SESSION_RESUME, Some(params))
            .await?;
        let response: SessionCreateResponse = serde_json::from_value(value)?;

        let existing = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&response.session_id)
            .cloned();
        let inner = match existing {
            Some(inner) => {
                inner.replace_handlers(
                    options.tool_handlers,
                    options.permission_handler,
                    options.config,
                );
                inner.set_state(SessionState::Active);
                inner
            }
            None => {
                let inner = Arc::new(SessionInner::new(
                    response.session_id.clone(),
                    options.tool_handlers,
                    options.permission_handler,
                    options.config,
                ));
                self.inner
                    .sessions
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(response.session_id, Arc::clone(&inner));
                inner
            }
        };
        Ok(Session::new(inner, Arc::clone(&self.inner.rpc)))
    }

    /// Deletes a session on the server and forgets it locally.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.ensure_connected().await?;
        self.inner
            .rpc
            .issue(
                methods::SESSION_DELETE,
                Some(json!({ "sessionId": session_id })),
            )
            .await?;
        let removed = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(inner) = removed {
            inner.set_state(SessionState::Closed);
        }
        Ok(())
    }

    /// Stops the client: closes sessions, disconnects, and kills the
    /// spawned server. Cleanup faults are collected and surfaced, not
    /// swallowed.
    pub async fn stop(&self) -> std::result::Result<(), StopError> {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let mut errors = Vec::new();

        let sessions: Vec<Arc<SessionInner>> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for session in sessions {
            session.set_state(SessionState::Closed);
        }

        if let Err(err) = self.inner.connection.shutdown().await {
            errors.push(err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StopError { errors })
        }
    }

    /// Stops without ceremony, ignoring cleanup faults.
    pub async fn force_stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _ = self.inner.connection.shutdown().await;
    }
}

impl ClientInner {
    fn ensure_not_stopped(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::connection("client was stopped"));
        }
        Ok(())
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        self.ensure_not_stopped()?;
        if self.connection.state() == ConnectionState::Connected {
            return Ok(());
        }
        if self.options.auto_start {
            self.connection.connect().await
        } else {
            Err(Error::connection(
                "not connected and auto_start is disabled; call connect() first",
            ))
        }
    }

    fn session(&self, session_id: &str) -> Option<Arc<SessionInner>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    fn snapshot_sessions(&self) -> Vec<Arc<SessionInner>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn broadcast(&self, event: &SessionEvent) {
        for session in self.snapshot_sessions() {
            session.emit(event);
        }
    }

    fn fail_all_sessions(&self, reason: &str) {
        warn!(reason, "failing all sessions");
        for session in self.snapshot_sessions() {
            if session.state() != SessionState::Closed {
                session.set_state(SessionState::Failed);
            }
        }
    }

    /// Re-resumes every known session after a restart. A session that
    /// cannot be resumed is failed explicitly so its callers never hang.
    async fn resume_all_sessions(self: &Arc<Self>) {
        for session in self.snapshot_sessions() {
            if session.state() == SessionState::Closed {
                continue;
            }
            session.set_state(SessionState::Resuming);
            let mut params = match serde_json::to_value(session.resume_config()) {
                Ok(params) => params,
                Err(err) => {
                    warn!(session = session.id(), error = %err, "resume config unserializable");
                    session.set_state(SessionState::Failed);
                    continue;
                }
            };
            params["sessionId"] = serde_json::Value::String(session.id().to_string());
            match self
                .rpc
                .issue(methods::SESSION_RESUME, Some(params))
                .await
            {
                Ok(_) => {
                    debug!(session = session.id(), "session resumed after restart");
                    session.set_state(SessionState::Active);
                }
                Err(err) => {
                    warn!(session = session.id(), error = %err,
                        "session could not be resumed after restart");
                    session.set_state(SessionState::Failed);
                }
            }
        }
    }

    /// Routes one event envelope, synchronously, preserving wire order.
    fn route_event(&self, envelope: agentwire_protocol::EventEnvelope) {
        match &envelope.session_id {
            Some(session_id) => match self.session(session_id) {
                Some(session) => session.handle_envelope(&envelope),
                None => {
                    debug!(session = %session_id, event = %envelope.event,
                        "dropping event for unknown session");
                }
            },
            None => {
                debug!(event = %envelope.event, "connection-global event");
            }
        }
    }

    /// Answers one server-initiated request. Exactly one reply goes back
    /// for every request id, whatever happens inside the handlers.
    async fn handle_server_request(self: &Arc<Self>, request: RequestEnvelope) {
        let reply = match request.method.as_str() {
            server_methods::TOOL_CALL => self.handle_tool_call(&request).await,
            server_methods::PERMISSION_REQUEST => self.handle_permission_request(&request).await,
            other => {
                warn!(method = %other, "server called an unsupported method");
                Envelope::error(
                    Some(request.id.clone()),
                    codes::METHOD_NOT_FOUND,
                    format!("method '{other}' not supported"),
                )
            }
        };
        if let Err(err) = self.rpc.send_envelope(&reply).await {
            warn!(error = %err, method = %request.method,
                "failed to reply to server request");
        }
    }

    async fn handle_tool_call(self: &Arc<Self>, request: &RequestEnvelope) -> Envelope {
        let invocation: ToolInvocation =
            match serde_json::from_value(request.params.clone().unwrap_or_default()) {
                Ok(invocation) => invocation,
                Err(err) => {
                    return Envelope::error(
                        Some(request.id.clone()),
                        codes::INVALID_PARAMS,
                        format!("invalid tool call params: {err}"),
                    );
                }
            };
        let Some(session) = self.session(&invocation.session_id) else {
            return Envelope::error(
                Some(request.id.clone()),
                codes::UNKNOWN_SESSION,
                format!("unknown session '{}'", invocation.session_id),
            );
        };
        let tool_name = invocation.tool_name.clone();
        let result = match session.tool_handler(&tool_name) {
            None => {
                warn!(tool = %tool_name, session = session.id(),
                    "tool invoked without a registered handler");
                ToolResult::rejected(format!("tool '{tool_name}' not supported"))
            }
            Some(handler) => match handler.handle(invocation).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(tool = %tool_name, error = %err, "tool handler failed");
                    ToolResult::failure(err.to_string())
                }
            },
        };
        match serde_json::to_value(&result) {
            Ok(value) => Envelope::response(request.id.clone(), value),
            Err(err) => Envelope::error(
                Some(request.id.clone()),
                codes::INVALID_PARAMS,
                format!("tool result unserializable: {err}"),
            ),
        }
    }

    async fn handle_permission_request(self: &Arc<Self>, request: &RequestEnvelope) -> Envelope {
        let permission: PermissionRequest =
            match serde_json::from_value(request.params.clone().unwrap_or_default()) {
                Ok(permission) => permission,
                Err(err) => {
                    return Envelope::error(
                        Some(request.id.clone()),
                        codes::INVALID_PARAMS,
                        format!("invalid permission request params: {err}"),
                    );
                }
            };
        let result = match self
            .session(&permission.session_id)
            .and_then(|session| session.permission_handler())
        {
            None => PermissionRequestResult::denied_no_approval_rule(),
            Some(handler) => match handler.handle(permission).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "permission handler failed, denying");
                    PermissionRequestResult::denied_no_approval_rule()
                }
            },
        };
        match serde_json::to_value(&result) {
            Ok(value) => Envelope::response(request.id.clone(), value),
            Err(err) => Envelope::error(
                Some(request.id.clone()),
                codes::INVALID_PARAMS,
                format!("permission result unserializable: {err}"),
            ),
        }
    }
}
