//! TCP transport: attach to an already-running agent server.
//!
//! Dials the parsed [`ServerAddress`], splits the stream, and runs the
//! same reader-task/bounded-channel shape as the stdio transport. TLS
//! addresses are rejected here; this SDK only speaks plaintext TCP to a
//! local or trusted server.

use crate::endpoint::ServerAddress;
use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportState};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;
const RECEIVE_BUFFER: usize = 1000;

/// TCP transport attached to a running server.
#[derive(Debug)]
pub struct TcpClientTransport {
    address: ServerAddress,
    state: Arc<RwLock<TransportState>>,
    writer: Mutex<Option<FramedWrite<OwnedWriteHalf, LinesCodec>>>,
    incoming: Mutex<Option<mpsc::Receiver<TransportMessage>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpClientTransport {
    /// Transport that will dial `address` on connect.
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            writer: Mutex::new(None),
            incoming: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    fn spawn_reader(
        &self,
        read_half: OwnedReadHalf,
        tx: mpsc::Sender<TransportMessage>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut framed =
                FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
            loop {
                match framed.next().await {
                    Some(Ok(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(err) = tx.try_send(TransportMessage::from(line)) {
                            match err {
                                mpsc::error::TrySendError::Full(_) => {
                                    warn!("incoming frame buffer full, dropping frame");
                                }
                                mpsc::error::TrySendError::Closed(_) => break,
                            }
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(max = MAX_LINE_LENGTH, "oversized frame dropped");
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        warn!(error = %err, "socket read failed");
                        let mut state = state.write().await;
                        if !matches!(
                            *state,
                            TransportState::Disconnecting | TransportState::Disconnected
                        ) {
                            *state = TransportState::Failed {
                                reason: format!("read failed: {err}"),
                            };
                        }
                        break;
                    }
                    None => {
                        debug!("server closed the connection");
                        let mut state = state.write().await;
                        if !matches!(
                            *state,
                            TransportState::Disconnecting | TransportState::Disconnected
                        ) {
                            *state = TransportState::Failed {
                                reason: "server closed the connection".to_string(),
                            };
                        }
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    async fn state(&self) -> TransportState {
        self.state.read().await.clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        {
            let state = self.state.read().await;
            if *state == TransportState::Connected {
                return Ok(());
            }
        }
        if self.address.tls {
            return Err(TransportError::ConfigurationError(format!(
                "TLS endpoints are not supported, got {}",
                self.address
            )));
        }
        *self.state.write().await = TransportState::Connecting;

        let stream = match TcpStream::connect(self.address.authority()).await {
            Ok(stream) => stream,
            Err(err) => {
                let failure =
                    TransportError::ConnectionFailed(format!("{}: {err}", self.address.authority()));
                *self.state.write().await = TransportState::Failed {
                    reason: failure.to_string(),
                };
                return Err(failure);
            }
        };
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(RECEIVE_BUFFER);
        *self.incoming.lock().await = Some(rx);
        *self.writer.lock().await = Some(FramedWrite::new(write_half, LinesCodec::new()));
        *self.reader_task.lock().await = Some(self.spawn_reader(read_half, tx));
        *self.state.write().await = TransportState::Connected;
        debug!(endpoint = %self.address, "tcp transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.state.write().await = TransportState::Disconnecting;
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = SinkExt::<String>::close(&mut writer).await;
        }
        self.incoming.lock().await.take();
        *self.state.write().await = TransportState::Disconnected;
        debug!(endpoint = %self.address, "tcp transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let line = message
            .as_str()
            .ok_or_else(|| {
                TransportError::SerializationFailed("frame is not valid UTF-8".to_string())
            })?
            .to_string();
        if line.contains('\n') {
            return Err(TransportError::SerializationFailed(
                "frame contains an embedded newline".to_string(),
            ));
        }
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::InvalidState("transport not connected".to_string()))?;
        writer
            .send(line)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut incoming = self.incoming.lock().await;
        let rx = incoming
            .as_mut()
            .ok_or_else(|| TransportError::InvalidState("transport not connected".to_string()))?;
        Ok(rx.recv().await)
    }

    fn endpoint(&self) -> String {
        self.address.to_string()
    }
}
