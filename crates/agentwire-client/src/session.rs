//! Sessions: the unit of conversation with the agent.
//!
//! A [`Session`] is a cheap-clone handle over shared state. Events for the
//! session arrive through the connection's routing task and are applied
//! synchronously, so subscribers observe them in wire order; streamed
//! assistant output is assembled per message id and checked against the
//! final message.
//!
//! Sending is gated two ways: enqueue-mode sends serialize on a
//! per-session lock so acceptance order equals call order, and every send
//! waits while the session is blocked compacting (context buffer past the
//! exhaustion threshold) until the compaction-completed event arrives.

use crate::handlers::{PermissionHandler, SessionEventHandler, ToolHandler};
use crate::rpc::RpcClient;
use agentwire_protocol::events::SessionEvent;
use agentwire_protocol::types::{
    MessageOptions, ResumeSessionConfig, SessionConfig, SessionSendResponse, SessionState,
};
use agentwire_protocol::wire::methods;
use agentwire_protocol::{Error, EventEnvelope, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything needed to create a session: the serializable configuration
/// plus the client-side handlers that stay out of the wire payload.
#[derive(Default)]
pub struct SessionOptions {
    /// Configuration sent to the server.
    pub config: SessionConfig,
    /// Handlers for the tools declared in `config.tools`, by tool name.
    pub tool_handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Decides permission requests; absent means default-deny.
    pub permission_handler: Option<Arc<dyn PermissionHandler>>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("config", &self.config)
            .field("tool_handlers", &self.tool_handlers.keys().collect::<Vec<_>>())
            .field("permission_handler", &self.permission_handler.is_some())
            .finish()
    }
}

impl SessionOptions {
    /// Options with the given model and everything else defaulted.
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            config: SessionConfig {
                model: Some(model.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Declares a tool and registers its handler in one step.
    pub fn add_tool(
        &mut self,
        tool: agentwire_protocol::types::Tool,
        handler: Arc<dyn ToolHandler>,
    ) -> &mut Self {
        self.tool_handlers.insert(tool.name.clone(), handler);
        self.config.tools.push(tool);
        self
    }

    /// Sets the permission handler.
    pub fn permission_handler(&mut self, handler: Arc<dyn PermissionHandler>) -> &mut Self {
        self.permission_handler = Some(handler);
        self
    }
}

/// Handlers and configuration re-applied when resuming a session.
#[derive(Default)]
pub struct ResumeOptions {
    /// Configuration sent to the server.
    pub config: ResumeSessionConfig,
    /// Handlers for the tools declared in `config.tools`, by tool name.
    pub tool_handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Decides permission requests; absent means default-deny.
    pub permission_handler: Option<Arc<dyn PermissionHandler>>,
}

impl std::fmt::Debug for ResumeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeOptions")
            .field("config", &self.config)
            .field("tool_handlers", &self.tool_handlers.keys().collect::<Vec<_>>())
            .field("permission_handler", &self.permission_handler.is_some())
            .finish()
    }
}

/// Handle returned by [`Session::on_event`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSubscription(Uuid);

pub(crate) struct SessionInner {
    id: String,
    state_tx: watch::Sender<SessionState>,
    tools: StdMutex<HashMap<String, Arc<dyn ToolHandler>>>,
    permission: StdMutex<Option<Arc<dyn PermissionHandler>>>,
    subscribers: StdMutex<Vec<(EventSubscription, SessionEventHandler)>>,
    /// Partial assistant output per message id, until the final message.
    buffers: StdMutex<HashMap<String, String>>,
    /// True while blocked compacting; sends wait on this.
    compaction_blocked_tx: watch::Sender<bool>,
    /// Serializes enqueue-mode sends.
    send_lock: Mutex<()>,
    /// Configuration re-sent on resume after a connection loss.
    resume_config: StdMutex<ResumeSessionConfig>,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("id", &self.id)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    pub(crate) fn new(
        id: String,
        tool_handlers: HashMap<String, Arc<dyn ToolHandler>>,
        permission_handler: Option<Arc<dyn PermissionHandler>>,
        resume_config: ResumeSessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Active);
        let (compaction_blocked_tx, _) = watch::channel(false);
        Self {
            id,
            state_tx,
            tools: StdMutex::new(tool_handlers),
            permission: StdMutex::new(permission_handler),
            subscribers: StdMutex::new(Vec::new()),
            buffers: StdMutex::new(HashMap::new()),
            compaction_blocked_tx,
            send_lock: Mutex::new(()),
            resume_config: StdMutex::new(resume_config),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let changed = {
            let current = self.state_tx.borrow();
            *current != state
        };
        if changed {
            let terminal = matches!(state, SessionState::Closed | SessionState::Failed);
            // send_replace updates the value even with no receivers alive.
            self.state_tx.send_replace(state.clone());
            if terminal {
                // Streams cut off mid-message never see a final message.
                self.buffers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clear();
                self.compaction_blocked_tx.send_replace(false);
            }
            self.emit(&SessionEvent::StateChanged(state));
        }
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn streaming(&self) -> bool {
        self.resume_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .streaming
    }

    pub(crate) fn resume_config(&self) -> ResumeSessionConfig {
        self.resume_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn replace_handlers(
        &self,
        tool_handlers: HashMap<String, Arc<dyn ToolHandler>>,
        permission_handler: Option<Arc<dyn PermissionHandler>>,
        resume_config: ResumeSessionConfig,
    ) {
        *self.tools.lock().unwrap_or_else(|e| e.into_inner()) = tool_handlers;
        *self.permission.lock().unwrap_or_else(|e| e.into_inner()) = permission_handler;
        *self
            .resume_config
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = resume_config;
    }

    pub(crate) fn tool_handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn permission_handler(&self) -> Option<Arc<dyn PermissionHandler>> {
        self.permission
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn subscribe(&self, handler: SessionEventHandler) -> EventSubscription {
        let token = EventSubscription(Uuid::new_v4());
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((token, handler));
        token
    }

    pub(crate) fn unsubscribe(&self, token: EventSubscription) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(t, _)| *t != token);
    }

    pub(crate) fn emit(&self, event: &SessionEvent) {
        let handlers: Vec<SessionEventHandler> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub(crate) fn compaction_blocked(&self) -> bool {
        *self.compaction_blocked_tx.borrow()
    }

    pub(crate) fn blocked_receiver(&self) -> watch::Receiver<bool> {
        self.compaction_blocked_tx.subscribe()
    }

    /// Applies one wire event: updates delta buffers and the compaction
    /// gate, then notifies subscribers. Runs synchronously on the routing
    /// task so ordering is the wire's.
    pub(crate) fn handle_envelope(&self, envelope: &EventEnvelope) {
        let event = match SessionEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(err) => {
                warn!(session = %self.id, event = %envelope.event, error = %err,
                    "dropping event with undecodable payload");
                return;
            }
        };
        match &event {
            SessionEvent::MessageDelta(delta) => {
                if !self.streaming() {
                    warn!(session = %self.id, message = %delta.message_id,
                        "delta event received with streaming disabled");
                } else {
                    self.buffers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .entry(format!("m:{}", delta.message_id))
                        .or_default()
                        .push_str(&delta.delta_content);
                }
            }
            SessionEvent::ReasoningDelta(delta) => {
                if !self.streaming() {
                    warn!(session = %self.id, message = %delta.message_id,
                        "delta event received with streaming disabled");
                } else {
                    self.buffers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .entry(format!("r:{}", delta.message_id))
                        .or_default()
                        .push_str(&delta.delta_content);
                }
            }
            SessionEvent::Message(message) => {
                let assembled = self
                    .buffers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&format!("m:{}", message.message_id));
                if let Some(assembled) = assembled {
                    if assembled != message.content {
                        warn!(session = %self.id, message = %message.message_id,
                            "assembled deltas disagree with the final message");
                    }
                }
                self.buffers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&format!("r:{}", message.message_id));
            }
            SessionEvent::CompactionStarted(started) => {
                if started.blocking {
                    debug!(session = %self.id, utilization = started.utilization,
                        "session blocked on compaction");
                    self.compaction_blocked_tx.send_replace(true);
                }
            }
            SessionEvent::CompactionCompleted(completed) => {
                debug!(session = %self.id, utilization = completed.utilization,
                    "compaction completed");
                self.compaction_blocked_tx.send_replace(false);
            }
            _ => {}
        }
        self.emit(&event);
    }

    /// Current assembled text for a streaming message, if any.
    pub(crate) fn partial_message(&self, message_id: &str) -> Option<String> {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&format!("m:{message_id}"))
            .cloned()
    }
}

/// Cheap-clone handle to one session.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<SessionInner>,
    rpc: Arc<RpcClient>,
}

impl Session {
    pub(crate) fn new(inner: Arc<SessionInner>, rpc: Arc<RpcClient>) -> Self {
        Self { inner, rpc }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watches session state changes.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_receiver()
    }

    /// Registers an event subscriber.
    ///
    /// Subscribers run synchronously, on the routing task for wire events
    /// and on the calling task for local state changes (including client
    /// teardown). Keep them fast, and do not take locks the caller may
    /// already hold.
    pub fn on_event(&self, handler: SessionEventHandler) -> EventSubscription {
        self.inner.subscribe(handler)
    }

    /// Removes an event subscriber.
    pub fn off_event(&self, token: EventSubscription) {
        self.inner.unsubscribe(token);
    }

    /// Assembled text so far for a streaming message.
    pub fn partial_message(&self, message_id: &str) -> Option<String> {
        self.inner.partial_message(message_id)
    }

    /// Sends a user message into the session.
    ///
    /// Enqueue mode serializes with other enqueue sends from this handle's
    /// session, so acceptance order equals call order; immediate mode
    /// skips the queue. Both modes wait while the session is blocked
    /// compacting.
    pub async fn send_message(&self, options: MessageOptions) -> Result<SessionSendResponse> {
        options.validate()?;
        match self.inner.state() {
            SessionState::Failed => {
                return Err(Error::session("session failed and cannot accept messages")
                    .with_session(self.id()));
            }
            SessionState::Closed => {
                return Err(Error::session("session is closed").with_session(self.id()));
            }
            SessionState::Active | SessionState::Resuming => {}
        }

        match options.mode {
            agentwire_protocol::types::MessageMode::Enqueue => {
                let _ordering = self.inner.send_lock.lock().await;
                self.wait_for_compaction().await?;
                self.issue_send(&options).await
            }
            agentwire_protocol::types::MessageMode::Immediate => {
                self.wait_for_compaction().await?;
                self.issue_send(&options).await
            }
        }
    }

    async fn wait_for_compaction(&self) -> Result<()> {
        let mut blocked = self.inner.blocked_receiver();
        while *blocked.borrow_and_update() {
            blocked.changed().await.map_err(|_| {
                Error::session("session dropped while waiting for compaction")
                    .with_session(self.id())
            })?;
        }
        Ok(())
    }

    async fn issue_send(&self, options: &MessageOptions) -> Result<SessionSendResponse> {
        let mut params = serde_json::to_value(options)?;
        params["sessionId"] = serde_json::Value::String(self.id().to_string());
        let value = self
            .rpc
            .issue(methods::SESSION_SEND, Some(params))
            .await
            .map_err(|e| e.with_session(self.id()))?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }
}
