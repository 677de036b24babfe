//! Correlation dispatcher.
//!
//! One routing task per connection epoch is the sole consumer of the
//! transport's receive side. It decodes each frame and routes it:
//! responses and errors-with-id complete the matching pending waiter,
//! server-initiated requests go to the registered request handler, and
//! events go to the registered event handler. Replies whose id matches
//! nothing (late after a timeout or cancel) are logged and discarded.
//!
//! A run of malformed frames past [`DECODE_FAILURE_THRESHOLD`] marks the
//! connection unhealthy and triggers the same path as a transport loss;
//! a single bad frame only costs a warning.

use agentwire_protocol::wire::{self, Envelope, RequestEnvelope, RequestId, WireError};
use agentwire_protocol::EventEnvelope;
use agentwire_transport::Transport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consecutive decode failures that mark the connection unhealthy.
pub(crate) const DECODE_FAILURE_THRESHOLD: u32 = 8;

/// Outcome delivered to a pending waiter.
#[derive(Debug)]
pub(crate) enum RpcReply {
    /// The server answered with a response envelope.
    Result(serde_json::Value),
    /// The server answered with an error envelope.
    Error(WireError),
}

/// Handles server-initiated requests. Invoked synchronously from the
/// routing task; implementations spawn their real work.
pub(crate) type ServerRequestHandler = Arc<dyn Fn(RequestEnvelope) + Send + Sync>;

/// Handles event envelopes, synchronously, preserving wire order.
pub(crate) type EventEnvelopeHandler = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

/// Called when the routing task ends because the connection is gone,
/// with the reason. Not called on deliberate shutdown.
pub(crate) type ConnectionLostHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Pending-request table plus the handlers a routing task fans out to.
pub(crate) struct Dispatcher {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<RpcReply>>>,
    request_handler: Mutex<Option<ServerRequestHandler>>,
    event_handler: Mutex<Option<EventEnvelopeHandler>>,
    connection_lost: Mutex<Option<ConnectionLostHandler>>,
    shutdown: Arc<Notify>,
    decode_failures: AtomicU32,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "pending",
                &self.pending.lock().map(|p| p.len()).unwrap_or_default(),
            )
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            request_handler: Mutex::new(None),
            event_handler: Mutex::new(None),
            connection_lost: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            decode_failures: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_request_handler(&self, handler: ServerRequestHandler) {
        *self.request_handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub(crate) fn set_event_handler(&self, handler: EventEnvelopeHandler) {
        *self.event_handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub(crate) fn set_connection_lost_handler(&self, handler: ConnectionLostHandler) {
        *self
            .connection_lost
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Registers a waiter for `id`. Must happen before the request frame
    /// is written, so an immediate reply still finds its slot.
    pub(crate) fn register(&self, id: RequestId) -> oneshot::Receiver<RpcReply> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    /// Removes a waiter (timeout or cancel). Returns whether it was
    /// still pending.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    /// Number of requests currently awaiting a reply.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fails every pending waiter by dropping its sender; receivers see
    /// the channel close and report the connection as lost.
    pub(crate) fn fail_all_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests");
        }
    }

    /// Stops the routing task.
    pub(crate) fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn complete(&self, id: &RequestId, reply: RpcReply) {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match sender {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    debug!(%id, "waiter dropped before its reply arrived");
                }
            }
            None => warn!(%id, "discarding reply with unknown id"),
        }
    }

    fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                let id = response.id;
                self.complete(&id, RpcReply::Result(response.result));
            }
            Envelope::Error(err) => match err.id {
                Some(id) => self.complete(&id, RpcReply::Error(err.error)),
                None => {
                    error!(code = err.error.code, message = %err.error.message,
                        "server reported a connection-level error");
                }
            },
            Envelope::Request(request) => {
                let handler = self
                    .request_handler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match handler {
                    Some(handler) => handler(request),
                    None => warn!(method = %request.method,
                        "dropping server request, no handler registered"),
                }
            }
            Envelope::Event(event) => {
                let handler = self
                    .event_handler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match handler {
                    Some(handler) => handler(event),
                    None => debug!(event = %event.event, "dropping event, no handler registered"),
                }
            }
        }
    }

    fn connection_lost(&self, reason: String) {
        self.fail_all_pending();
        let handler = self
            .connection_lost
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }

    /// Spawns the routing task for one connection epoch.
    pub(crate) fn spawn_routing_task(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        dispatcher.decode_failures.store(0, Ordering::Relaxed);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("routing task shutting down");
                        dispatcher.fail_all_pending();
                        break;
                    }
                    received = transport.receive() => match received {
                        Ok(Some(frame)) => {
                            let Some(line) = frame.as_str() else {
                                warn!("dropping non-UTF-8 frame");
                                if dispatcher.note_decode_failure() {
                                    dispatcher.connection_lost(
                                        "too many malformed frames".to_string());
                                    break;
                                }
                                continue;
                            };
                            match wire::decode_envelope(line) {
                                Ok(envelope) => {
                                    dispatcher.decode_failures.store(0, Ordering::Relaxed);
                                    dispatcher.route(envelope);
                                }
                                Err(err) => {
                                    warn!(error = %err, "dropping undecodable frame");
                                    if dispatcher.note_decode_failure() {
                                        dispatcher.connection_lost(
                                            "too many malformed frames".to_string());
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            dispatcher.connection_lost("server closed the connection".to_string());
                            break;
                        }
                        Err(err) => {
                            dispatcher.connection_lost(format!("transport failed: {err}"));
                            break;
                        }
                    }
                }
            }
        })
    }

    fn note_decode_failure(&self) -> bool {
        self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1 >= DECODE_FAILURE_THRESHOLD
    }
}
