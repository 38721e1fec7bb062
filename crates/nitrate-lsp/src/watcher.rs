//! File-change forwarding.
//!
//! Turns [`FileEvent`]s that match a [`WatchPattern`] into
//! `workspace/didChangeWatchedFiles` notifications. Events seen while the
//! session is not running are dropped.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::document::file_uri;
use crate::error::LspError;
use crate::lifecycle::SessionState;
use crate::session::Session;

/// LSP `FileChangeType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

impl FileChangeType {
    /// The numeric wire value.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One change to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The changed file.
    pub path: PathBuf,
    /// What happened to it.
    pub change_type: FileChangeType,
}

impl FileEvent {
    /// An event for `path`.
    pub fn new(path: impl Into<PathBuf>, change_type: FileChangeType) -> Self {
        Self {
            path: path.into(),
            change_type,
        }
    }
}

/// A compiled watch glob. `*` never crosses `/`; `**` spans directories.
#[derive(Debug, Clone)]
pub struct WatchPattern {
    source: String,
    matcher: GlobMatcher,
}

impl WatchPattern {
    /// Compile `pattern`. Fails with [`LspError::InvalidPattern`].
    pub fn new(pattern: &str) -> Result<Self, LspError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| LspError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// The glob as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match `path` as given, or relative to `root` when it lies under it.
    pub fn matches(&self, path: &Path, root: Option<&Path>) -> bool {
        if self.matcher.is_match(path) {
            return true;
        }
        root.and_then(|root| path.strip_prefix(root).ok())
            .is_some_and(|relative| self.matcher.is_match(relative))
    }
}

/// Sends matching file events to a session.
#[derive(Debug, Clone)]
pub struct ChangeForwarder {
    pattern: WatchPattern,
}

impl ChangeForwarder {
    /// A forwarder for events matching `pattern`.
    pub fn new(pattern: WatchPattern) -> Self {
        Self { pattern }
    }

    /// The pattern events are filtered by.
    pub fn pattern(&self) -> &WatchPattern {
        &self.pattern
    }

    /// Forward the matching subset of `events` as one notification.
    ///
    /// Returns how many changes were sent; zero when nothing matched or the
    /// session is not running.
    pub async fn forward(&self, session: &Session, events: &[FileEvent]) -> Result<usize, LspError> {
        let state = session.state();
        if state != SessionState::Running {
            if !events.is_empty() {
                debug!(count = events.len(), ?state, "dropping file events, session not running");
            }
            return Ok(0);
        }

        let changes: Vec<Value> = events
            .iter()
            .filter_map(|event| self.change(session.root(), event))
            .collect();
        if changes.is_empty() {
            return Ok(0);
        }

        let count = changes.len();
        match session
            .send_notification(
                "workspace/didChangeWatchedFiles",
                json!({ "changes": changes }),
            )
            .await
        {
            Ok(()) => {
                trace!(count, "forwarded file changes");
                Ok(count)
            }
            Err(LspError::NotRunning(state)) => {
                debug!(count, ?state, "dropping file events, session stopped meanwhile");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn change(&self, root: Option<&Path>, event: &FileEvent) -> Option<Value> {
        let path = match root {
            Some(root) if event.path.is_relative() => root.join(&event.path),
            _ => event.path.clone(),
        };
        if !self.pattern.matches(&path, root) {
            trace!(path = %path.display(), pattern = %self.pattern.as_str(), "file event not watched");
            return None;
        }
        match file_uri(&path) {
            Ok(uri) => Some(json!({ "uri": uri, "type": event.change_type.code() })),
            Err(err) => {
                warn!("skipping file event: {}", err);
                None
            }
        }
    }

    /// Forward events from `events` until the channel closes.
    ///
    /// Events already queued when the task wakes up go out as one batch.
    pub fn spawn(self, session: Arc<Session>, mut events: mpsc::Receiver<FileEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(first) = events.recv().await {
                let mut batch = vec![first];
                while let Ok(event) = events.try_recv() {
                    batch.push(event);
                }
                if let Err(err) = self.forward(&session, &batch).await {
                    warn!("failed to forward file events: {}", err);
                }
            }
            debug!("file event channel closed");
        })
    }
}
