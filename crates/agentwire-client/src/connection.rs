//! Connection lifecycle.
//!
//! The manager owns the transport for the current connection epoch and a
//! factory that can make a new one, so restarting after a loss is just
//! running the factory again. `connect` is idempotent and race-safe: a
//! mutex serializes attempts and a second caller observes the first's
//! outcome.
//!
//! A periodic ping watches connection health; three consecutive failures
//! count as a loss. On loss the pending table is failed, sessions are
//! notified, and, with auto-restart enabled, a bounded backoff loop
//! reconnects and resumes sessions. When the attempts run out the
//! sessions are failed explicitly rather than left hanging.

use crate::dispatcher::Dispatcher;
use crate::rpc::{RpcClient, TransportSlot};
use agentwire_protocol::types::ConnectionState;
use agentwire_protocol::wire::methods;
use agentwire_protocol::{Error, Result};
use agentwire_transport::Transport;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive ping failures that count as a connection loss.
const HEALTH_CHECK_STRIKES: u32 = 3;

/// Makes a fresh transport for a connection epoch. Runs at connect time
/// and again on every restart attempt.
pub type TransportFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Transport>>> + Send + Sync>;

/// Notifies sessions that the connection was lost.
pub(crate) type SessionsNotifier = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Resumes sessions after a successful restart.
pub(crate) type ResumeSessions = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Fails sessions when restarting gave up.
pub(crate) type FailSessions = Arc<dyn Fn(String) + Send + Sync>;

/// Tuning for the lifecycle manager, derived from the client options.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub auto_restart: bool,
    pub restart_attempts: u32,
    pub restart_backoff: Duration,
}

pub(crate) struct ConnectionManager {
    factory: TransportFactory,
    slot: TransportSlot,
    dispatcher: Arc<Dispatcher>,
    rpc: Arc<RpcClient>,
    config: LifecycleConfig,
    state_tx: watch::Sender<ConnectionState>,
    connect_lock: Mutex<()>,
    routing_task: StdMutex<Option<JoinHandle<()>>>,
    health_task: StdMutex<Option<JoinHandle<()>>>,
    restart_task: StdMutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    notify_sessions: StdMutex<Option<SessionsNotifier>>,
    resume_sessions: StdMutex<Option<ResumeSessions>>,
    fail_sessions: StdMutex<Option<FailSessions>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        factory: TransportFactory,
        slot: TransportSlot,
        dispatcher: Arc<Dispatcher>,
        rpc: Arc<RpcClient>,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Arc::new(Self {
            factory,
            slot,
            dispatcher: Arc::clone(&dispatcher),
            rpc,
            config,
            state_tx,
            connect_lock: Mutex::new(()),
            routing_task: StdMutex::new(None),
            health_task: StdMutex::new(None),
            restart_task: StdMutex::new(None),
            shutting_down: AtomicBool::new(false),
            notify_sessions: StdMutex::new(None),
            resume_sessions: StdMutex::new(None),
            fail_sessions: StdMutex::new(None),
        });
        // The routing task reports losses back here.
        let weak = Arc::downgrade(&manager);
        dispatcher.set_connection_lost_handler(Arc::new(move |reason| {
            if let Some(manager) = weak.upgrade() {
                manager.spawn_connection_lost(reason);
            }
        }));
        manager
    }

    pub(crate) fn set_session_hooks(
        &self,
        notify: SessionsNotifier,
        resume: ResumeSessions,
        fail: FailSessions,
    ) {
        *self
            .notify_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(notify);
        *self
            .resume_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(resume);
        *self.fail_sessions.lock().unwrap_or_else(|e| e.into_inner()) = Some(fail);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = { *self.state_tx.borrow() != state };
        if changed {
            debug!(state = ?state, "connection state changed");
            // send_replace updates the value even with no receivers alive.
            self.state_tx.send_replace(state.clone());
            let notify = self
                .notify_sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(notify) = notify {
                notify(state);
            }
        }
    }

    /// Establishes the connection. Returns immediately when already
    /// connected; concurrent callers serialize on the attempt.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::connection("client is shutting down"));
        }
        self.set_state(ConnectionState::Connecting);

        let transport = match (self.factory)().await {
            Ok(transport) => transport,
            Err(err) => {
                self.set_state(ConnectionState::Error);
                return Err(err.with_operation("connect"));
            }
        };
        if let Err(err) = transport.connect().await {
            self.set_state(ConnectionState::Error);
            return Err(Error::from(err).with_operation("connect"));
        }
        info!(endpoint = %transport.endpoint(), "connected to agent server");

        *self.slot.write().await = Some(Arc::clone(&transport));
        let routing = self.dispatcher.spawn_routing_task(transport);
        if let Some(old) = self
            .routing_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(routing)
        {
            old.abort();
        }
        self.set_state(ConnectionState::Connected);
        self.start_health_check();
        Ok(())
    }

    fn start_health_check(self: &Arc<Self>) {
        if self.config.ping_interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.ping_interval;
        let timeout = self.config.ping_timeout;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut strikes = 0u32;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                if manager.state() != ConnectionState::Connected {
                    break;
                }
                match manager
                    .rpc
                    .issue_with_timeout(methods::PING, Some(json!({})), timeout)
                    .await
                {
                    Ok(_) => strikes = 0,
                    Err(err) => {
                        strikes += 1;
                        warn!(strikes, error = %err, "health check ping failed");
                        if strikes >= HEALTH_CHECK_STRIKES {
                            manager.spawn_connection_lost(format!(
                                "{HEALTH_CHECK_STRIKES} consecutive health checks failed"
                            ));
                            break;
                        }
                    }
                }
            }
        });
        if let Some(old) = self
            .health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            old.abort();
        }
    }

    /// Entry point for loss reports from the routing task and the health
    /// check. Synchronous so it can run from callbacks; the real handling
    /// happens on a spawned task.
    pub(crate) fn spawn_connection_lost(self: &Arc<Self>, reason: String) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        // Tearing down the old transport makes the routing and health
        // paths report the same loss again; a live restart task must not
        // be aborted by that echo.
        let mut slot = self
            .restart_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(reason = %reason, "connection loss already being handled");
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            manager.handle_connection_lost(reason).await;
        }));
    }

    async fn handle_connection_lost(self: &Arc<Self>, reason: String) {
        if self.state() == ConnectionState::Error {
            return;
        }
        error!(reason = %reason, "connection to agent server lost");
        self.set_state(ConnectionState::Error);
        self.dispatcher.fail_all_pending();
        if let Some(transport) = self.slot.write().await.take() {
            let _ = transport.disconnect().await;
        }
        if let Some(task) = self.health_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }

        if !self.config.auto_restart {
            self.fail_sessions(format!("connection lost: {reason}"));
            return;
        }

        let mut backoff = self.config.restart_backoff;
        for attempt in 1..=self.config.restart_attempts {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            info!(attempt, "attempting to restart the connection");
            match self.connect().await {
                Ok(()) => {
                    let resume = self
                        .resume_sessions
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    if let Some(resume) = resume {
                        resume().await;
                    }
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "restart attempt failed");
                }
            }
        }
        error!(
            attempts = self.config.restart_attempts,
            "giving up on restarting the connection"
        );
        self.fail_sessions(format!(
            "connection lost and {} restart attempts failed",
            self.config.restart_attempts
        ));
    }

    fn fail_sessions(&self, reason: String) {
        let fail = self
            .fail_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(fail) = fail {
            fail(reason);
        }
    }

    /// Tears everything down. Used by `stop` and `Drop`.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        for slot in [&self.health_task, &self.restart_task] {
            if let Some(task) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                task.abort();
            }
        }
        self.dispatcher.shutdown();
        let mut result = Ok(());
        if let Some(transport) = self.slot.write().await.take() {
            if let Err(err) = transport.disconnect().await {
                result = Err(Error::from(err).with_operation("shutdown"));
            }
        }
        if let Some(task) = self
            .routing_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Best-effort synchronous teardown for `Drop`.
    pub(crate) fn shutdown_sync(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.dispatcher.shutdown();
        for slot in [&self.health_task, &self.restart_task, &self.routing_task] {
            if let Some(task) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                task.abort();
            }
        }
    }
}
