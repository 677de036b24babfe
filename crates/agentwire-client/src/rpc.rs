//! Request issuing over the current transport.
//!
//! Ids are a monotonically increasing counter scoped to the client; the
//! waiter is registered with the dispatcher before the frame is written,
//! so a reply can never race its own registration. Each request carries a
//! deadline; on expiry the pending entry is removed and any late reply
//! becomes an unknown-id discard. Dropping the `issue` future before it
//! resolves removes the entry too and best-effort tells the server the
//! request was abandoned.

use crate::dispatcher::{Dispatcher, RpcReply};
use agentwire_protocol::wire::{methods, Envelope, RequestId};
use agentwire_protocol::{Error, Result};
use agentwire_transport::{Transport, TransportMessage};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared slot holding the connection epoch's transport.
pub(crate) type TransportSlot = Arc<RwLock<Option<Arc<dyn Transport>>>>;

/// Issues requests and writes raw envelopes.
pub(crate) struct RpcClient {
    dispatcher: Arc<Dispatcher>,
    slot: TransportSlot,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Removes the pending entry when an `issue` future is dropped before
/// resolution, and best-effort notifies the server.
struct CancelGuard {
    dispatcher: Arc<Dispatcher>,
    slot: TransportSlot,
    id: RequestId,
    armed: bool,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.dispatcher.remove(&self.id) {
            return;
        }
        debug!(id = %self.id, "request future dropped, cancelling");
        let slot = Arc::clone(&self.slot);
        let id = self.id.clone();
        // Notify the server outside the destructor; ignore failures, the
        // cancel is advisory.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let transport = slot.read().await.clone();
                if let Some(transport) = transport {
                    let notice = Envelope::event(
                        methods::REQUEST_CANCEL,
                        None,
                        json!({ "id": id }),
                    );
                    if let Ok(line) = agentwire_protocol::encode_envelope(&notice) {
                        let _ = transport.send(TransportMessage::from(line)).await;
                    }
                }
            });
        }
    }
}

impl RpcClient {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        slot: TransportSlot,
        request_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            slot,
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    async fn current_transport(&self) -> Result<Arc<dyn Transport>> {
        self.slot
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::connection("not connected"))
    }

    /// Issues one request and awaits its reply, with the default deadline.
    pub(crate) async fn issue(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.issue_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Issues one request with an explicit deadline.
    pub(crate) async fn issue_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let transport = self.current_transport().await?;
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Register before writing the frame.
        let receiver = self.dispatcher.register(id.clone());
        let mut guard = CancelGuard {
            dispatcher: Arc::clone(&self.dispatcher),
            slot: Arc::clone(&self.slot),
            id: id.clone(),
            armed: true,
        };

        let envelope = Envelope::request(id.clone(), method, params);
        let line = agentwire_protocol::encode_envelope(&envelope)
            .map_err(|e| Error::serialization(e.to_string()).with_operation(method))?;
        if let Err(err) = transport.send(TransportMessage::from(line)).await {
            self.dispatcher.remove(&id);
            guard.disarm();
            return Err(Error::from(err).with_operation(method));
        }

        let outcome = tokio::time::timeout(timeout, receiver).await;
        guard.disarm();
        match outcome {
            Err(_) => {
                self.dispatcher.remove(&id);
                warn!(%id, method, ?timeout, "request timed out");
                Err(Error::timeout(format!(
                    "request {id} ({method}) timed out after {timeout:?}"
                ))
                .with_operation(method))
            }
            Ok(Err(_closed)) => Err(Error::connection(format!(
                "connection lost before request {id} ({method}) completed"
            ))
            .with_operation(method)),
            Ok(Ok(RpcReply::Result(value))) => Ok(value),
            Ok(Ok(RpcReply::Error(wire_error))) => {
                let mut err =
                    Error::server(wire_error.code, wire_error.message).with_operation(method);
                if let Some(data) = wire_error.data {
                    err = err.with_detail("data", data);
                }
                Err(err)
            }
        }
    }

    /// Writes one envelope without registering a waiter. Used for replies
    /// to server-initiated requests and for advisory notices.
    pub(crate) async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let transport = self.current_transport().await?;
        let line = agentwire_protocol::encode_envelope(envelope)
            .map_err(|e| Error::serialization(e.to_string()))?;
        transport
            .send(TransportMessage::from(line))
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentwire_protocol::wire::RequestEnvelope;
    use agentwire_transport::ProcessTransport;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn harness() -> (
        Arc<Dispatcher>,
        RpcClient,
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<()>,
    ) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport: Arc<dyn Transport> =
            Arc::new(ProcessTransport::from_raw(read_half, write_half));
        transport.connect().await.unwrap();
        let dispatcher = Arc::new(Dispatcher::new());
        let task = dispatcher.spawn_routing_task(Arc::clone(&transport));
        let slot: TransportSlot = Arc::new(RwLock::new(Some(transport)));
        let rpc = RpcClient::new(
            Arc::clone(&dispatcher),
            slot,
            Duration::from_secs(5),
        );
        (dispatcher, rpc, server_side, task)
    }

    #[tokio::test]
    async fn issue_resolves_with_the_matching_result() {
        let (_dispatcher, rpc, server, _task) = harness().await;
        let (server_read, mut server_write) = tokio::io::split(server);

        let echo = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let envelope = agentwire_protocol::decode_envelope(&line).unwrap();
            let Envelope::Request(RequestEnvelope { id, method, .. }) = envelope else {
                panic!("expected request");
            };
            assert_eq!(method, "ping");
            let reply = Envelope::response(id, serde_json::json!({"pong": true}));
            let frame = agentwire_protocol::encode_envelope(&reply).unwrap();
            server_write
                .write_all(format!("{frame}\n").as_bytes())
                .await
                .unwrap();
        });

        let value = rpc.issue("ping", None).await.unwrap();
        assert_eq!(value["pong"], true);
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_removes_the_pending_entry() {
        let (dispatcher, rpc, _server, _task) = harness().await;
        let err = rpc
            .issue_with_timeout("slow.op", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, agentwire_protocol::ErrorKind::Timeout);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn server_error_envelope_maps_to_a_server_error() {
        let (_dispatcher, rpc, server, _task) = harness().await;
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let Envelope::Request(req) = agentwire_protocol::decode_envelope(&line).unwrap()
            else {
                panic!("expected request");
            };
            let reply = Envelope::error(Some(req.id), -32601, "method not found");
            let frame = agentwire_protocol::encode_envelope(&reply).unwrap();
            server_write
                .write_all(format!("{frame}\n").as_bytes())
                .await
                .unwrap();
        });

        let err = rpc.issue("bogus.method", None).await.unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.server_code(), Some(-32601));
    }

    #[tokio::test]
    async fn dropping_an_issue_future_cancels_the_request() {
        let (dispatcher, rpc, server, _task) = harness().await;
        let (server_read, _server_write) = tokio::io::split(server);

        let mut issue = Box::pin(rpc.issue("slow.op", None));
        // Drive the future past registration and send, then drop it.
        tokio::select! {
            _ = issue.as_mut() => panic!("no reply was ever sent"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(dispatcher.pending_count(), 1);
        drop(issue);
        assert_eq!(dispatcher.pending_count(), 0);

        // The cancel notice reaches the wire.
        let mut lines = BufReader::new(server_read).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.contains("slow.op"));
        let second = lines.next_line().await.unwrap().unwrap();
        assert!(second.contains(methods::REQUEST_CANCEL));
    }

    #[tokio::test]
    async fn ids_increase_monotonically() {
        let (_dispatcher, rpc, server, _task) = harness().await;
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(Envelope::Request(req)) = agentwire_protocol::decode_envelope(&line)
                else {
                    continue;
                };
                let reply = Envelope::response(req.id, serde_json::json!({}));
                let frame = agentwire_protocol::encode_envelope(&reply).unwrap();
                if server_write
                    .write_all(format!("{frame}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        for _ in 0..3 {
            rpc.issue("ping", None).await.unwrap();
        }
        assert_eq!(rpc.next_id.load(Ordering::Relaxed), 4);
    }
}
