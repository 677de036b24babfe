//! Scripted in-memory agent server for integration tests.
//!
//! `scripted_factory` produces a [`TransportFactory`] whose transports are
//! backed by `tokio::io::duplex`; the far end is driven by a server task
//! that answers requests through a caller-supplied behavior closure. The
//! [`ServerHandle`] outlives individual connections, so tests can inject
//! events, park replies, crash the connection, and inspect what the
//! client sent across restarts.

#![allow(dead_code)]

use agentwire_client::{ClientOptions, TransportFactory};
use agentwire_protocol::wire::{codes, methods, Envelope, RequestEnvelope};
use agentwire_protocol::{decode_envelope, encode_envelope};
use agentwire_transport::{ProcessTransport, Transport};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Decides the frames a request is answered with.
pub type Behavior = Arc<dyn Fn(&RequestEnvelope) -> Vec<Envelope> + Send + Sync>;

/// Test-side view of the scripted server, shared across reconnects.
#[derive(Clone)]
pub struct ServerHandle {
    /// Sender into the current connection's writer task.
    inject: Arc<StdMutex<Option<mpsc::UnboundedSender<Envelope>>>>,
    /// Kill switch for the current connection's tasks.
    kill: Arc<StdMutex<Option<watch::Sender<bool>>>>,
    /// Non-request frames the client sent: replies to server-initiated
    /// requests and client-sent events.
    from_client: mpsc::UnboundedSender<Envelope>,
    /// How many times the factory ran.
    pub connects: Arc<AtomicUsize>,
    /// Every request the client sent, across all connections.
    requests: Arc<StdMutex<Vec<RequestEnvelope>>>,
    /// Replies a behavior chose to hold back.
    parked: Arc<StdMutex<Vec<Envelope>>>,
}

impl ServerHandle {
    /// A handle plus the stream of non-request frames the client produces.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        init_tracing();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        let handle = Self {
            inject: Arc::new(StdMutex::new(None)),
            kill: Arc::new(StdMutex::new(None)),
            from_client: from_client_tx,
            connects: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(StdMutex::new(Vec::new())),
            parked: Arc::new(StdMutex::new(Vec::new())),
        };
        (handle, from_client_rx)
    }

    /// Pushes a frame to the client on the current connection.
    pub fn emit(&self, envelope: Envelope) {
        let inject = self.inject.lock().unwrap().clone();
        if let Some(tx) = inject {
            let _ = tx.send(envelope);
        }
    }

    /// Severs the current connection; the client sees EOF.
    pub fn crash(&self) {
        self.inject.lock().unwrap().take();
        if let Some(kill) = self.kill.lock().unwrap().take() {
            let _ = kill.send(true);
        }
    }

    /// Holds a reply back until [`ServerHandle::release_parked`].
    pub fn park(&self, envelope: Envelope) {
        self.parked.lock().unwrap().push(envelope);
    }

    /// Sends every parked reply, in the order they were parked.
    pub fn release_parked(&self) {
        let parked: Vec<Envelope> = self.parked.lock().unwrap().drain(..).collect();
        for envelope in parked {
            self.emit(envelope);
        }
    }

    /// Drains parked replies for a behavior to return inline.
    pub fn take_parked(&self) -> Vec<Envelope> {
        self.parked.lock().unwrap().drain(..).collect()
    }

    /// Whether the client has sent a request with this method.
    pub fn saw_method(&self, method: &str) -> bool {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.method == method)
    }

    /// Prompts of every `session.send` seen, in arrival order.
    pub fn send_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == methods::SESSION_SEND)
            .filter_map(|r| {
                r.params
                    .as_ref()
                    .and_then(|p| p["prompt"].as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    /// Params of the first request with this method, if any arrived.
    pub fn request_params(&self, method: &str) -> Option<serde_json::Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.method == method)
            .and_then(|r| r.params.clone())
    }
}

/// A factory whose transports talk to a scripted server task.
pub fn scripted_factory(handle: ServerHandle, behavior: Behavior) -> TransportFactory {
    Arc::new(move || {
        let handle = handle.clone();
        let behavior = Arc::clone(&behavior);
        Box::pin(async move {
            handle.connects.fetch_add(1, Ordering::SeqCst);
            let (client_side, server_side) = tokio::io::duplex(256 * 1024);
            let (read_half, mut write_half) = tokio::io::split(server_side);
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
            let (kill_tx, kill_rx) = watch::channel(false);
            *handle.inject.lock().unwrap() = Some(out_tx.clone());
            *handle.kill.lock().unwrap() = Some(kill_tx);

            let mut writer_kill = kill_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = writer_kill.changed() => break,
                        frame = out_rx.recv() => {
                            let Some(envelope) = frame else { break };
                            let line = encode_envelope(&envelope).unwrap();
                            if write_half
                                .write_all(format!("{line}\n").as_bytes())
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            });

            let reader_handle = handle.clone();
            let mut reader_kill = kill_rx;
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    tokio::select! {
                        _ = reader_kill.changed() => break,
                        line = lines.next_line() => {
                            let Ok(Some(line)) = line else { break };
                            let Ok(envelope) = decode_envelope(&line) else { continue };
                            match envelope {
                                Envelope::Request(request) => {
                                    reader_handle.requests.lock().unwrap().push(request.clone());
                                    for reply in behavior(&request) {
                                        if out_tx.send(reply).is_err() {
                                            break;
                                        }
                                    }
                                }
                                other => {
                                    let _ = reader_handle.from_client.send(other);
                                }
                            }
                        }
                    }
                }
            });

            let (read_half, write_half) = tokio::io::split(client_side);
            Ok(Arc::new(ProcessTransport::from_raw(read_half, write_half)) as Arc<dyn Transport>)
        })
    })
}

/// Answers every method a well-behaved server would.
pub fn standard_behavior() -> Behavior {
    let send_counter = AtomicUsize::new(0);
    Arc::new(move |request| {
        let id = request.id.clone();
        match request.method.as_str() {
            methods::PING => vec![Envelope::response(
                id,
                json!({"timestamp": 1, "protocolVersion": 1}),
            )],
            methods::GET_STATUS => vec![Envelope::response(
                id,
                json!({"version": "0.9.1", "protocolVersion": 1}),
            )],
            methods::GET_AUTH_STATUS => {
                vec![Envelope::response(id, json!({"isAuthenticated": true}))]
            }
            methods::LIST_MODELS => vec![Envelope::response(
                id,
                json!({"models": [{"id": "claude-sonnet-4.5", "name": "Claude Sonnet 4.5"}]}),
            )],
            methods::SESSION_LIST => vec![Envelope::response(id, json!({"sessions": []}))],
            methods::SESSION_CREATE => {
                vec![Envelope::response(id, json!({"sessionId": "s-1"}))]
            }
            methods::SESSION_RESUME => {
                let session_id = request
                    .params
                    .as_ref()
                    .and_then(|p| p["sessionId"].as_str())
                    .unwrap_or("s-1")
                    .to_string();
                vec![Envelope::response(id, json!({"sessionId": session_id}))]
            }
            methods::SESSION_SEND => {
                let n = send_counter.fetch_add(1, Ordering::SeqCst) + 1;
                vec![Envelope::response(id, json!({"messageId": format!("m-{n}")}))]
            }
            methods::SESSION_DELETE => vec![Envelope::response(id, json!({}))],
            other => vec![Envelope::error(
                Some(id),
                codes::METHOD_NOT_FOUND,
                format!("method '{other}' not supported"),
            )],
        }
    })
}

/// Options tuned for tests: short timeouts, no health ping, fast restart.
pub fn test_options() -> ClientOptions {
    ClientOptions {
        request_timeout: Duration::from_secs(2),
        ping_interval: Duration::ZERO,
        restart_attempts: 3,
        restart_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
