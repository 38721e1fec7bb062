//! Byte transport to the language server.
//!
//! Owns the server process (or any duplex byte stream) and runs the I/O
//! tasks: one writer draining an ordered channel of framed messages, one
//! reader decoding frames from stdout, one stderr collector, and one
//! supervisor that reports process exit.
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::LspError;
use crate::framer::{FramingError, MessageReader};

/// Capacity of the outgoing frame queue.
const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Number of stderr lines kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 64;

/// How long to wait for the process to be reaped after a kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How to launch the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    /// Executable name or path.
    pub executable: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the client's when `None`.
    pub cwd: Option<PathBuf>,
}

impl ServerCommand {
    /// A command with no arguments.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Set the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// How the server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

/// Something that happened on the incoming side of the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete JSON body, in stream order.
    Frame(Value),
    /// The byte stream could not be framed; no more frames will follow.
    FramingFailed(FramingError),
    /// The server closed its output (EOF or read error).
    Closed,
    /// The server process exited.
    Exited(ProcessExit),
}

/// Bounded tail of the server's stderr output.
#[derive(Debug, Clone, Default)]
pub struct StderrLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrLog {
    /// Record a line, evicting the oldest beyond [`STDERR_TAIL_LINES`].
    pub fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// The retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Cloneable handle for queueing framed bytes to the writer task.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl FrameSender {
    /// Queue bytes for writing. Writes happen in queue order, never
    /// interleaved.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), LspError> {
        self.tx
            .send(bytes)
            .await
            .map_err(|_| LspError::TransportLost)
    }
}

struct ChildControl {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ChildControl {
    async fn wait_exit(&mut self, limit: Duration) -> bool {
        matches!(
            timeout(limit, self.exit_rx.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        )
    }

    async fn terminate(&mut self, grace: Duration) {
        if self.wait_exit(grace).await {
            return;
        }
        warn!(pid = ?self.pid, "server did not exit within {:?}, killing", grace);
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
        if !self.wait_exit(KILL_WAIT).await {
            error!(pid = ?self.pid, "server process could not be reaped");
        }
    }
}

/// The byte-level connection to a server.
pub struct Transport {
    sender: FrameSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    child: Option<ChildControl>,
    stderr: StderrLog,
}

impl Transport {
    /// Spawn the server process with piped stdio.
    pub fn spawn(command: &ServerCommand) -> Result<Self, LspError> {
        let mut cmd = TokioCommand::new(&command.executable);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::Spawn(format!("{}: {}", command.executable, e)))?;
        let pid = child.id();
        info!(executable = %command.executable, args = ?command.args, ?pid, "spawned language server");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Spawn("could not capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Spawn("could not capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LspError::Spawn("could not capture stderr".into()))?;

        let (mut transport, events) = Self::wire(stdout, stdin);

        let log = transport.stderr.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "nitrate_lsp::stderr", "{}", line);
                log.push(line);
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, kill_rx, exit_tx, events));

        transport.child = Some(ChildControl {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
        });
        Ok(transport)
    }

    /// Run the transport over an arbitrary byte stream pair.
    ///
    /// EOF on `reader` is reported as [`TransportEvent::Closed`].
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::wire(reader, writer).0
    }

    fn wire<R, W>(reader: R, writer: W) -> (Self, mpsc::UnboundedSender<TransportEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(writer, frame_rx, shutdown_rx));
        tokio::spawn(read_loop(reader, events_tx.clone()));

        let transport = Self {
            sender: FrameSender { tx: frame_tx },
            shutdown_tx: Some(shutdown_tx),
            events: Some(events_rx),
            child: None,
            stderr: StderrLog::default(),
        };
        (transport, events_tx)
    }

    /// Handle for queueing outgoing frames.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Take the incoming event stream. Only the first call returns `Some`.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    /// The captured stderr tail.
    pub fn stderr(&self) -> StderrLog {
        self.stderr.clone()
    }

    /// OS process id, for spawned servers.
    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.pid)
    }

    /// How the process ended, if it has.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.child.as_ref().and_then(|c| *c.exit_rx.borrow())
    }

    /// Close the input side, give the process `grace` to exit, then kill it.
    ///
    /// Frames queued before the call are still written. Safe to call more
    /// than once.
    pub async fn close(&mut self, grace: Duration) {
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(());
        }
        if let Some(child) = self.child.as_mut() {
            child.terminate(grace).await;
        }
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    // A dropped kill sender means the transport is gone; kill in that case too.
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let status = match waited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let exit = match status {
        Ok(status) => ProcessExit {
            code: status.code(),
        },
        Err(e) => {
            error!("failed waiting for server process: {}", e);
            ProcessExit { code: None }
        }
    };
    info!(code = ?exit.code, "language server exited");
    let _ = exit_tx.send(Some(exit));
    let _ = events.send(TransportEvent::Exited(exit));
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::Receiver<Vec<u8>>,
    mut shutdown: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => {
                let Some(bytes) = frame else { break };
                trace!(bytes = bytes.len(), "writing frame");
                if let Err(e) = write_frame(&mut writer, &bytes).await {
                    warn!("failed writing to server: {}", e);
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
    trace!("writer task finished");
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn read_loop<R>(reader: R, events: mpsc::UnboundedSender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = MessageReader::new(reader);
    loop {
        let event = match reader.read_frame().await {
            Ok(Some(frame)) => {
                if events.send(TransportEvent::Frame(frame)).is_err() {
                    break;
                }
                continue;
            }
            Ok(None) => {
                debug!("server closed its output");
                TransportEvent::Closed
            }
            Err(LspError::Framing(err)) => {
                error!("framing error on server output: {}", err);
                TransportEvent::FramingFailed(err)
            }
            Err(err) => {
                warn!("read error on server output: {}", err);
                TransportEvent::Closed
            }
        };
        let _ = events.send(event);
        break;
    }
}
