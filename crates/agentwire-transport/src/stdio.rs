//! Stdio transport: the agent server as a spawned child process.
//!
//! The server is launched with `tokio::process::Command`; frames travel as
//! newline-delimited JSON over the child's stdin/stdout while stderr is
//! inherited so server diagnostics land in the host's output. A background
//! reader task drains stdout through a `LinesCodec` into a bounded channel;
//! `receive` pops from that channel.
//!
//! For tests, [`ProcessTransport::from_raw`] accepts any async read/write
//! pair (typically the ends of `tokio::io::duplex`) instead of spawning.

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportState};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Longest line the reader accepts before dropping it.
const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Depth of the incoming frame channel.
const RECEIVE_BUFFER: usize = 1000;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How to launch the server process.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
}

impl ProcessCommand {
    /// Command for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }
}

/// Where the byte streams come from.
enum StreamSource {
    /// Spawn the server process on connect.
    Spawn(ProcessCommand),
    /// Pre-built streams, consumed by the first connect.
    Raw {
        reader: Option<BoxedReader>,
        writer: Option<BoxedWriter>,
    },
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(cmd) => f.debug_tuple("Spawn").field(&cmd.program).finish(),
            Self::Raw { .. } => f.write_str("Raw"),
        }
    }
}

/// Stdio transport over a spawned child process or raw streams.
pub struct ProcessTransport {
    source: Mutex<StreamSource>,
    state: Arc<RwLock<TransportState>>,
    writer: Arc<Mutex<Option<FramedWrite<BoxedWriter, LinesCodec>>>>,
    incoming: Mutex<Option<mpsc::Receiver<TransportMessage>>>,
    child: Arc<Mutex<Option<Child>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    endpoint: String,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ProcessTransport {
    /// Transport that spawns the server process on connect.
    pub fn spawn(command: ProcessCommand) -> Self {
        let endpoint = format!("stdio://{}", command.program.display());
        Self {
            source: Mutex::new(StreamSource::Spawn(command)),
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            incoming: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            reader_task: Mutex::new(None),
            endpoint,
        }
    }

    /// Transport over caller-supplied streams. Used by tests and anywhere
    /// the process is managed externally.
    pub fn from_raw(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            source: Mutex::new(StreamSource::Raw {
                reader: Some(Box::new(reader)),
                writer: Some(Box::new(writer)),
            }),
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            incoming: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            reader_task: Mutex::new(None),
            endpoint: "stdio://raw".to_string(),
        }
    }

    async fn take_streams(&self) -> TransportResult<(BoxedReader, BoxedWriter)> {
        let mut source = self.source.lock().await;
        match &mut *source {
            StreamSource::Spawn(command) => {
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true);
                if let Some(cwd) = &command.cwd {
                    cmd.current_dir(cwd);
                }
                for (key, value) in &command.env {
                    cmd.env(key, value);
                }
                let mut child = cmd.spawn().map_err(|e| {
                    TransportError::ProcessError(format!(
                        "failed to spawn {}: {e}",
                        command.program.display()
                    ))
                })?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    TransportError::ProcessError("child stdin was not piped".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    TransportError::ProcessError("child stdout was not piped".to_string())
                })?;
                debug!(program = %command.program.display(), pid = child.id(), "server process spawned");
                *self.child.lock().await = Some(child);
                Ok((Box::new(stdout), Box::new(stdin)))
            }
            StreamSource::Raw { reader, writer } => {
                let reader = reader.take().ok_or_else(|| {
                    TransportError::InvalidState(
                        "raw streams already consumed by an earlier connect".to_string(),
                    )
                })?;
                let writer = writer.take().ok_or_else(|| {
                    TransportError::InvalidState(
                        "raw streams already consumed by an earlier connect".to_string(),
                    )
                })?;
                Ok((reader, writer))
            }
        }
    }

    fn spawn_reader(
        &self,
        reader: BoxedReader,
        tx: mpsc::Sender<TransportMessage>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut framed = FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            );
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
                        warn!(error = %err, "stdout read failed");
                        let mut state = state.write().await;
                        if !matches!(*state, TransportState::Disconnecting | TransportState::Disconnected) {
                            *state = TransportState::Failed {
                                reason: format!("read failed: {err}"),
                            };
                        }
                        break;
                    }
                    None => {
                        debug!("server stdout closed");
                        let mut state = state.write().await;
                        if !matches!(*state, TransportState::Disconnecting | TransportState::Disconnected) {
                            *state = TransportState::Failed {
                                reason: "server closed its output".to_string(),
                            };
                        }
                        break;
                    }
                }
            }
            // tx drops here, closing the receive channel.
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
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
        *self.state.write().await = TransportState::Connecting;

        let (reader, writer) = match self.take_streams().await {
            Ok(streams) => streams,
            Err(err) => {
                *self.state.write().await = TransportState::Failed {
                    reason: err.to_string(),
                };
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(RECEIVE_BUFFER);
        *self.incoming.lock().await = Some(rx);
        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));
        *self.reader_task.lock().await = Some(self.spawn_reader(reader, tx));
        *self.state.write().await = TransportState::Connected;
        debug!(endpoint = %self.endpoint, "stdio transport connected");
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
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill server process");
            }
            let _ = child.wait().await;
        }

        *self.state.write().await = TransportState::Disconnected;
        debug!(endpoint = %self.endpoint, "stdio transport disconnected");
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
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn raw_transport_round_trips_frames() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = ProcessTransport::from_raw(read_half, write_half);
        assert_ok!(transport.connect().await);
        assert_eq!(transport.state().await, TransportState::Connected);

        transport
            .send(TransportMessage::from(r#"{"type":"request","id":1,"method":"ping"}"#))
            .await
            .unwrap();

        // Read the client's frame off the far end.
        let mut buf = vec![0u8; 1024];
        let n = tokio::io::AsyncReadExt::read(&mut server_side, &mut buf)
            .await
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            "{\"type\":\"request\",\"id\":1,\"method\":\"ping\"}\n"
        );

        // Push a frame back and receive it.
        server_side
            .write_all(b"{\"type\":\"response\",\"id\":1,\"result\":{}}\n")
            .await
            .unwrap();
        let received = transport.receive().await.unwrap().unwrap();
        assert_eq!(
            received.as_str(),
            Some(r#"{"type":"response","id":1,"result":{}}"#)
        );

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn peer_close_drains_then_ends_receive() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = ProcessTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        let mut server_side = server_side;
        server_side
            .write_all(b"{\"type\":\"event\",\"event\":\"server.ready\",\"data\":{}}\n")
            .await
            .unwrap();
        server_side.shutdown().await.unwrap();
        drop(server_side);

        // Buffered frame still arrives.
        assert!(transport.receive().await.unwrap().is_some());
        // Then the channel ends.
        assert!(transport.receive().await.unwrap().is_none());
        assert!(matches!(
            transport.state().await,
            TransportState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn embedded_newline_rejected_before_the_wire() {
        let (client_side, _server_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = ProcessTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        let err = transport
            .send(TransportMessage::from("{\"a\":1}\n{\"b\":2}"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SerializationFailed(_)));
    }

    #[tokio::test]
    async fn send_before_connect_is_invalid_state() {
        let (client_side, _server_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = ProcessTransport::from_raw(read_half, write_half);
        let err = transport
            .send(TransportMessage::from("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidState(_)));
    }

    #[tokio::test]
    async fn raw_streams_cannot_be_connected_twice() {
        let (client_side, _server_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = ProcessTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(transport.connect().await.is_err());
    }
}
