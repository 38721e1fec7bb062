//! nitrate-lsp: Language Server Protocol client engine for Nitrate.
//!
//! This crate spawns and supervises a language server, frames JSON-RPC
//! traffic over its stdio, correlates requests with responses, and forwards
//! document and file-change notifications through a [`Session`].
pub mod connection;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod framer;
pub mod lifecycle;
pub mod message;
pub mod session;
pub mod transport;
pub mod watcher;

// Re-export key types for convenience.
pub use connection::{CancelHandle, ConnectionEnd, RequestHandle};
pub use document::{DocumentFilter, DocumentSelector, TextDocumentItem};
pub use error::LspError;
pub use framer::FramingError;
pub use lifecycle::SessionState;
pub use message::{Message, RequestId, ResponseError};
pub use session::{ClientInfo, ServerInfo, Session, SessionEvent, SessionOptions};
pub use transport::{ProcessExit, ServerCommand, StderrLog, Transport};
pub use watcher::{ChangeForwarder, FileChangeType, FileEvent, WatchPattern};
