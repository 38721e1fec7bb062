use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// Values without the prefix, and every value when the home directory
/// is unknown, are returned unchanged.
pub fn expand_home(value: &str) -> String {
    let rest = match value.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return value.to_string(),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home.display().to_string(),
        Some(home) => home.join(rest).display().to_string(),
        None => value.to_string(),
    }
}

/// How the language server is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable name or path.
    #[serde(default = "default_command")]
    pub command: String,
    /// Command-line arguments; a leading `~/` is expanded.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for the server process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

fn default_command() -> String {
    "qpkg".to_string()
}

fn default_args() -> Vec<String> {
    ["lsp", "--log", "~/nitrated-lsp.log", "--no-color"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ServerConfig {
    /// Arguments with `~/` expanded.
    pub fn expanded_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| expand_home(arg)).collect()
    }

    /// Working directory with `~/` expanded.
    pub fn expanded_cwd(&self) -> Option<PathBuf> {
        self.cwd
            .as_deref()
            .map(Path::to_string_lossy)
            .map(|cwd| PathBuf::from(expand_home(&cwd)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            cwd: None,
        }
    }
}

/// One document selector filter. A missing field or `"*"` matches anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Client identity and what it forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stable client identifier.
    #[serde(default = "default_client_id")]
    pub id: String,
    /// Display name sent to the server.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Documents handled by the session.
    #[serde(default = "default_document_selector")]
    pub document_selector: Vec<SelectorEntry>,
    /// Glob for file-change events forwarded to the server.
    #[serde(default = "default_file_watch")]
    pub file_watch: String,
    /// Passed verbatim as `initializationOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<toml::Table>,
}

fn default_client_id() -> String {
    "nitrateLanguageServer".to_string()
}

fn default_client_name() -> String {
    "Nitrate Language Server".to_string()
}

fn default_document_selector() -> Vec<SelectorEntry> {
    vec![SelectorEntry {
        scheme: Some("file".to_string()),
        language: Some("nitrate".to_string()),
    }]
}

fn default_file_watch() -> String {
    "**/.clientrc".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            name: default_client_name(),
            document_selector: default_document_selector(),
            file_watch: default_file_watch(),
            initialization_options: None,
        }
    }
}

/// Session start/stop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Bound on the graceful `shutdown`/`exit` exchange.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Time the server gets to exit before it is killed.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Bound on the `initialize` round trip; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_timeout_ms: Option<u64>,
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_close_grace_ms() -> u64 {
    2000
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn initialize_timeout(&self) -> Option<Duration> {
        self.initialize_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            initialize_timeout_ms: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server process.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client identity, selector and watch pattern.
    #[serde(default)]
    pub client: ClientConfig,
    /// Timeouts.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}
