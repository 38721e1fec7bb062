//! LSP client error types.
use std::path::PathBuf;

use crate::framer::FramingError;
use crate::lifecycle::SessionState;

/// Errors from LSP client operations.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// The incoming byte stream could not be framed. Fatal to the session.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The server process exited or its pipes closed unexpectedly.
    #[error("transport lost: server process exited or closed its pipes")]
    TransportLost,

    /// A message broke the protocol (unknown response id, bad shape).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The request was cancelled locally.
    #[error("request cancelled")]
    Cancelled,

    /// JSON-RPC error returned by the server.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// The error code.
        code: i64,
        /// The error message.
        message: String,
        /// Optional structured payload.
        data: Option<serde_json::Value>,
    },

    /// Server process failed to start.
    #[error("server failed to start: {0}")]
    Spawn(String),

    /// `start()` failed; the session is now `Failed`.
    #[error("session start failed while {phase:?}: {source}")]
    StartFailed {
        /// The state the session was in when the failure happened.
        phase: SessionState,
        /// The underlying failure.
        #[source]
        source: Box<LspError>,
    },

    /// The operation needs a running session.
    #[error("session is not running (state: {0:?})")]
    NotRunning(SessionState),

    /// The operation is not valid in the current state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// A lifecycle transition that the state machine forbids.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// A bounded wait expired.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The session was stopped while the request was outstanding.
    #[error("session closed")]
    SessionClosed,

    /// A watch glob that does not compile.
    #[error("invalid watch pattern: {0}")]
    InvalidPattern(String),

    /// A path that cannot be expressed as a `file://` URI.
    #[error("cannot convert path to URI: {}", .0.display())]
    InvalidPath(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LspError {
    /// Whether this error ends the whole session rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LspError::Framing(_) | LspError::TransportLost)
    }
}
