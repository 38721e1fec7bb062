//! Client session: one supervised connection to a language server.
//!
//! A [`Session`] spawns the server, runs the `initialize` handshake, routes
//! traffic while running, and shuts the server down on [`Session::stop`].
//! A dead connection moves the session to [`SessionState::Failed`] and is
//! broadcast to subscribers.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionEnd, RequestHandle};
use crate::dispatcher::Dispatcher;
use crate::document::{file_uri, DocumentSelector};
use crate::error::LspError;
use crate::lifecycle::{Lifecycle, SessionState};
use crate::message::ResponseError;
use crate::transport::{ServerCommand, StderrLog, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default bound on the graceful part of [`Session::stop`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time the server gets to exit after `exit` before it is killed.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Who we are, as told to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Stable identifier, used in logs.
    pub id: String,
    /// Display name, sent as `clientInfo.name`.
    pub name: String,
    /// Sent as `clientInfo.version`.
    pub version: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: "nitrateLanguageServer".into(),
            name: "Nitrate Language Server".into(),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        }
    }
}

/// `serverInfo` from the `initialize` result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    /// Server name as reported by the server.
    pub name: String,
    /// Server version, if reported.
    #[serde(default)]
    pub version: Option<String>,
}

/// Broadcast to [`Session::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session entered a new state.
    StateChanged(SessionState),
    /// The session failed; `reason` describes why.
    Failed { reason: String },
}

/// Everything a session needs to know before it starts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How to launch the server.
    pub command: ServerCommand,
    /// Client identity.
    pub client_info: ClientInfo,
    /// Workspace root; sent as `rootUri` and used to resolve relative paths.
    pub root: Option<PathBuf>,
    /// Which documents this session handles.
    pub selector: DocumentSelector,
    /// Sent verbatim as `initializationOptions`.
    pub initialization_options: Option<Value>,
    /// Bound on the `initialize` round trip. Unbounded when `None`.
    pub initialize_timeout: Option<Duration>,
    /// Bound on the graceful part of `stop()`.
    pub shutdown_timeout: Duration,
    /// Time the process gets to exit on its own before it is killed.
    pub close_grace: Duration,
}

impl SessionOptions {
    /// Options with no root, a match-everything selector and the default
    /// shutdown timeout and close grace.
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            client_info: ClientInfo::default(),
            root: None,
            selector: DocumentSelector::default(),
            initialization_options: None,
            initialize_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    /// Set the workspace root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Restrict the session to documents matching `selector`.
    pub fn with_selector(mut self, selector: DocumentSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the client identity sent in `initialize`.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Set `initializationOptions`.
    pub fn with_initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = Some(options);
        self
    }

    /// Bound the `initialize` round trip.
    pub fn with_initialize_timeout(mut self, limit: Duration) -> Self {
        self.initialize_timeout = Some(limit);
        self
    }

    /// Bound the graceful part of `stop()`.
    pub fn with_shutdown_timeout(mut self, limit: Duration) -> Self {
        self.shutdown_timeout = limit;
        self
    }

    /// Time the process gets to exit after `exit` before it is killed.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    options: SessionOptions,
    lifecycle: StdMutex<Lifecycle>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    connection: StdMutex<Option<Connection>>,
    /// Also serializes `start` and `stop`.
    transport: Mutex<Option<Transport>>,
    events: broadcast::Sender<SessionEvent>,
    capabilities: StdMutex<Option<Value>>,
    server_info: StdMutex<Option<ServerInfo>>,
    stderr: StdMutex<StderrLog>,
}

impl Shared {
    fn state(&self) -> SessionState {
        lock(&self.lifecycle).state()
    }

    fn transition(&self, next: SessionState) -> Result<(), LspError> {
        let prev = lock(&self.lifecycle).transition(next)?;
        info!(client = %self.options.client_info.id, from = ?prev, to = ?next, "session state changed");
        let _ = self.events.send(SessionEvent::StateChanged(next));
        Ok(())
    }

    /// Move to `Failed` and announce it. Returns `false` if already terminal.
    fn fail(&self, reason: &str) -> bool {
        let prev = {
            let mut lifecycle = lock(&self.lifecycle);
            let prev = lifecycle.state();
            if !lifecycle.fail() {
                return false;
            }
            prev
        };
        error!(client = %self.options.client_info.id, from = ?prev, "session failed: {}", reason);
        let _ = self
            .events
            .send(SessionEvent::StateChanged(SessionState::Failed));
        let _ = self.events.send(SessionEvent::Failed {
            reason: reason.to_string(),
        });
        true
    }

    fn connection(&self) -> Option<Connection> {
        lock(&self.connection).clone()
    }

    fn connection_ended(self: Arc<Self>, end: ConnectionEnd) {
        match self.state() {
            SessionState::Stopping | SessionState::Stopped | SessionState::Failed => {
                debug!(%end, "connection closed");
            }
            _ => {
                if self.fail(&end.to_string()) {
                    tokio::spawn(async move {
                        lock(&self.connection).take();
                        if let Some(mut transport) = self.transport.lock().await.take() {
                            transport.close(Duration::ZERO).await;
                        }
                    });
                }
            }
        }
    }

    async fn release(&self, slot: &mut Option<Transport>, grace: Duration) {
        self.dispatcher.lock().await.close();
        lock(&self.connection).take();
        if let Some(mut transport) = slot.take() {
            transport.close(grace).await;
        }
    }
}

/// A client session with one language server.
///
/// Methods take `&self`; share the session in an `Arc` for concurrent use.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session. Nothing is spawned until [`Session::start`].
    pub fn new(options: SessionOptions) -> Self {
        let mut dispatcher = Dispatcher::new();
        register_builtin_handlers(&mut dispatcher);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                options,
                lifecycle: StdMutex::new(Lifecycle::new()),
                dispatcher: Arc::new(Mutex::new(dispatcher)),
                connection: StdMutex::new(None),
                transport: Mutex::new(None),
                events,
                capabilities: StdMutex::new(None),
                server_info: StdMutex::new(None),
                stderr: StdMutex::new(StderrLog::default()),
            }),
        }
    }

    /// The options this session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receive state changes and failures from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// The `capabilities` object the server answered `initialize` with.
    pub fn server_capabilities(&self) -> Option<Value> {
        lock(&self.shared.capabilities).clone()
    }

    /// `serverInfo` from the `initialize` result, once running.
    pub fn server_info(&self) -> Option<ServerInfo> {
        lock(&self.shared.server_info).clone()
    }

    /// The most recent lines the server wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        lock(&self.shared.stderr).lines()
    }

    /// The workspace root, if one was configured.
    pub fn root(&self) -> Option<&Path> {
        self.shared.options.root.as_deref()
    }

    /// Whether documents with this scheme and language belong to this session.
    pub fn handles(&self, scheme: &str, language: &str) -> bool {
        self.shared.options.selector.matches(scheme, language)
    }

    /// Run `handler` for every `method` notification from the server.
    ///
    /// Handlers for the same method run in registration order.
    pub async fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .lock()
            .await
            .on_notification(method, Arc::new(handler));
    }

    /// Answer server-to-client `method` requests with `handler`, replacing
    /// any earlier handler (built-ins included).
    pub async fn on_request<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, ResponseError> + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .lock()
            .await
            .on_request(method, Arc::new(handler));
    }

    /// Spawn the configured server and run the handshake.
    pub async fn start(&self) -> Result<(), LspError> {
        let mut slot = self.shared.transport.lock().await;
        self.begin_start()?;
        info!(
            client = %self.shared.options.client_info.id,
            command = %self.shared.options.command.executable,
            "starting language server"
        );
        match Transport::spawn(&self.shared.options.command) {
            Ok(transport) => self.handshake(&mut slot, transport).await,
            Err(err) => Err(self.abort_start(&mut slot, SessionState::Starting, err).await),
        }
    }

    /// Run the handshake over an already connected transport.
    pub async fn start_with_transport(&self, transport: Transport) -> Result<(), LspError> {
        let mut slot = self.shared.transport.lock().await;
        self.begin_start()?;
        self.handshake(&mut slot, transport).await
    }

    fn begin_start(&self) -> Result<(), LspError> {
        let state = self.state();
        if state != SessionState::Uninitialized {
            return Err(LspError::InvalidState(format!(
                "cannot start a session that is {:?}",
                state
            )));
        }
        self.shared.transition(SessionState::Starting)
    }

    async fn handshake(
        &self,
        slot: &mut Option<Transport>,
        mut transport: Transport,
    ) -> Result<(), LspError> {
        let Some(events) = transport.take_events() else {
            let err = LspError::InvalidState("transport is already in use".into());
            return Err(self.abort_start(slot, SessionState::Starting, err).await);
        };
        *lock(&self.shared.stderr) = transport.stderr();

        let connection = Connection::new(Arc::clone(&self.shared.dispatcher), transport.sender());
        let weak = Arc::downgrade(&self.shared);
        connection.listen(events, move |end| {
            if let Some(shared) = weak.upgrade() {
                shared.connection_ended(end);
            }
        });
        *slot = Some(transport);
        *lock(&self.shared.connection) = Some(connection.clone());

        if let Err(err) = self.shared.transition(SessionState::Initializing) {
            let cause = self.failure_cause(err);
            return Err(self.abort_start(slot, SessionState::Starting, cause).await);
        }
        if let Err(err) = self.initialize(&connection).await {
            return Err(self.abort_start(slot, SessionState::Initializing, err).await);
        }
        if let Err(err) = self.shared.transition(SessionState::Running) {
            let cause = self.failure_cause(err);
            return Err(self.abort_start(slot, SessionState::Initializing, cause).await);
        }
        Ok(())
    }

    /// A transition out of a start phase fails only when the connection
    /// died underneath us.
    fn failure_cause(&self, err: LspError) -> LspError {
        if self.state() == SessionState::Failed {
            LspError::TransportLost
        } else {
            err
        }
    }

    async fn initialize(&self, connection: &Connection) -> Result<(), LspError> {
        let handle = connection
            .send_request("initialize", self.initialize_params()?)
            .await?;
        let result = match self.shared.options.initialize_timeout {
            Some(limit) => timeout(limit, handle)
                .await
                .map_err(|_| LspError::Timeout("initialize response".into()))??,
            None => handle.await?,
        };

        let Some(capabilities) = result.get("capabilities").cloned() else {
            return Err(LspError::ProtocolViolation(
                "initialize result has no capabilities".into(),
            ));
        };
        let server_info = result
            .get("serverInfo")
            .cloned()
            .and_then(|info| match serde_json::from_value::<ServerInfo>(info) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("ignoring malformed serverInfo: {}", e);
                    None
                }
            });
        if let Some(info) = &server_info {
            info!(server = %info.name, version = ?info.version, "server initialized");
        }
        *lock(&self.shared.capabilities) = Some(capabilities);
        *lock(&self.shared.server_info) = server_info;

        connection.send_notification("initialized", json!({})).await
    }

    fn initialize_params(&self) -> Result<Value, LspError> {
        let options = &self.shared.options;
        let root_uri = options.root.as_deref().map(file_uri).transpose()?;
        let workspace_folders = match (&options.root, &root_uri) {
            (Some(root), Some(uri)) => json!([{
                "uri": uri,
                "name": root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.display().to_string()),
            }]),
            _ => Value::Null,
        };

        let mut params = json!({
            "processId": std::process::id(),
            "clientInfo": {
                "name": options.client_info.name,
                "version": options.client_info.version,
            },
            "rootUri": root_uri,
            "rootPath": options.root.as_ref().map(|root| root.display().to_string()),
            "workspaceFolders": workspace_folders,
            "capabilities": client_capabilities(),
            "trace": "off",
        });
        if let Some(init) = &options.initialization_options {
            params["initializationOptions"] = init.clone();
        }
        Ok(params)
    }

    async fn abort_start(
        &self,
        slot: &mut Option<Transport>,
        phase: SessionState,
        err: LspError,
    ) -> LspError {
        self.shared
            .fail(&format!("start failed while {:?}: {}", phase, err));
        lock(&self.shared.connection).take();
        self.shared
            .dispatcher
            .lock()
            .await
            .disconnect(|| LspError::TransportLost);
        if let Some(mut transport) = slot.take() {
            transport.close(Duration::ZERO).await;
        }
        LspError::StartFailed {
            phase,
            source: Box::new(err),
        }
    }

    fn running_connection(&self) -> Result<Connection, LspError> {
        let state = self.state();
        if state != SessionState::Running {
            return Err(LspError::NotRunning(state));
        }
        self.shared
            .connection()
            .ok_or(LspError::NotRunning(state))
    }

    /// Send a request; await the returned handle for the result.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<RequestHandle, LspError> {
        self.running_connection()?
            .send_request(method, params)
            .await
    }

    /// Send a request and wait for its result.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.send_request(method, params).await?.await
    }

    /// Send a notification.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), LspError> {
        self.running_connection()?
            .send_notification(method, params)
            .await
    }

    /// Cancel a pending request. Returns `false` if it was not pending.
    pub async fn cancel(&self, id: i64) -> bool {
        match self.shared.connection() {
            Some(connection) => connection.cancel(id).await,
            None => false,
        }
    }

    /// Shut the server down. Always completes.
    ///
    /// From `Running` this sends `shutdown` and `exit` within the shutdown
    /// timeout, then closes the transport and ends `Stopped`. A failed
    /// session only releases its resources. Afterwards no response can
    /// resolve any request handle.
    pub async fn stop(&self) {
        let mut slot = self.shared.transport.lock().await;
        match self.state() {
            SessionState::Uninitialized | SessionState::Stopped => return,
            SessionState::Running => {}
            SessionState::Failed => {
                self.shared.release(&mut slot, Duration::ZERO).await;
                return;
            }
            SessionState::Starting | SessionState::Initializing => {
                // A start() whose future was dropped midway.
                self.shared.fail("start was abandoned");
                self.shared.release(&mut slot, Duration::ZERO).await;
                return;
            }
            SessionState::Stopping => {
                self.shared.release(&mut slot, Duration::ZERO).await;
                let _ = self.shared.transition(SessionState::Stopped);
                return;
            }
        }

        if self.shared.transition(SessionState::Stopping).is_err() {
            // The connection failed between the check and the transition.
            self.shared.release(&mut slot, Duration::ZERO).await;
            return;
        }

        let limit = self.shared.options.shutdown_timeout;
        let deadline = Instant::now() + limit;
        let graceful = match self.shared.connection() {
            Some(connection) => match timeout_at(deadline, shutdown_handshake(&connection)).await {
                Ok(Ok(())) => {
                    debug!("server acknowledged shutdown");
                    true
                }
                Ok(Err(err)) if err.is_fatal() => {
                    debug!("server went away during shutdown: {}", err);
                    false
                }
                Ok(Err(err)) => {
                    warn!("graceful shutdown failed: {}", err);
                    false
                }
                Err(_) => {
                    warn!("server did not acknowledge shutdown within {:?}", limit);
                    false
                }
            },
            None => false,
        };

        let grace = if graceful {
            self.shared
                .options
                .close_grace
                .min(deadline.saturating_duration_since(Instant::now()))
        } else {
            Duration::ZERO
        };
        self.shared.release(&mut slot, grace).await;
        if let Err(err) = self.shared.transition(SessionState::Stopped) {
            warn!("could not mark session stopped: {}", err);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.shared.options.client_info.id)
            .field("command", &self.shared.options.command.executable)
            .field("state", &self.state())
            .finish()
    }
}

async fn shutdown_handshake(connection: &Connection) -> Result<(), LspError> {
    let acknowledged = connection.send_request("shutdown", Value::Null).await?.await;
    connection.send_notification("exit", Value::Null).await?;
    acknowledged.map(|_| ())
}

fn client_capabilities() -> Value {
    json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": true
            },
            "publishDiagnostics": {
                "relatedInformation": true
            }
        },
        "workspace": {
            "didChangeWatchedFiles": {
                "dynamicRegistration": true
            },
            "configuration": true,
            "workspaceFolders": true
        },
        "window": {
            "workDoneProgress": true
        }
    })
}

fn accept_registration(_params: Value) -> Result<Value, ResponseError> {
    Ok(Value::Null)
}

/// One `null` per requested item: the client has no settings to offer.
fn empty_configuration(params: Value) -> Result<Value, ResponseError> {
    let count = params
        .get("items")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    Ok(Value::Array(vec![Value::Null; count]))
}

fn log_server_message(params: Value) {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    // LSP MessageType: 1 error, 2 warning, 3 info, 4 log.
    match params.get("type").and_then(Value::as_i64) {
        Some(1) => error!(target: "nitrate_lsp::server", "{}", message),
        Some(2) => warn!(target: "nitrate_lsp::server", "{}", message),
        Some(3) => info!(target: "nitrate_lsp::server", "{}", message),
        _ => debug!(target: "nitrate_lsp::server", "{}", message),
    }
}

fn register_builtin_handlers(dispatcher: &mut Dispatcher) {
    for method in [
        "client/registerCapability",
        "client/unregisterCapability",
        "window/workDoneProgress/create",
    ] {
        dispatcher.on_request(method, Arc::new(accept_registration));
    }
    dispatcher.on_request("workspace/configuration", Arc::new(empty_configuration));
    dispatcher.on_notification("window/logMessage", Arc::new(log_server_message));
    dispatcher.on_notification("window/showMessage", Arc::new(log_server_message));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SessionOptions {
        SessionOptions::new(ServerCommand::new("nitrate-no-such-binary-xyz"))
    }

    #[test]
    fn options_defaults() {
        let opts = options();
        assert_eq!(opts.client_info.id, "nitrateLanguageServer");
        assert_eq!(opts.client_info.name, "Nitrate Language Server");
        assert_eq!(opts.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(opts.close_grace, DEFAULT_CLOSE_GRACE);
        assert!(opts.initialize_timeout.is_none());
        assert!(opts.selector.matches("file", "nitrate"));
    }

    #[test]
    fn new_session_is_uninitialized() {
        let session = Session::new(options());
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.server_capabilities().is_none());
        assert!(session.stderr_tail().is_empty());
        assert!(format!("{session:?}").contains("Uninitialized"));
    }

    #[tokio::test]
    async fn requests_need_running_session() {
        let session = Session::new(options());
        assert!(matches!(
            session.send_request("x", Value::Null).await,
            Err(LspError::NotRunning(SessionState::Uninitialized))
        ));
        assert!(matches!(
            session.send_notification("x", Value::Null).await,
            Err(LspError::NotRunning(SessionState::Uninitialized))
        ));
        assert!(!session.cancel(1).await);
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let session = Session::new(options());
        session.stop().await;
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn spawn_failure_fails_start() {
        let session = Session::new(options());
        let mut events = session.subscribe();
        let err = session.start().await.unwrap_err();
        match err {
            LspError::StartFailed { phase, source } => {
                assert_eq!(phase, SessionState::Starting);
                assert!(matches!(*source, LspError::Spawn(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged(SessionState::Starting)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged(SessionState::Failed)
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Failed { .. }
        ));

        assert!(matches!(
            session.start().await,
            Err(LspError::InvalidState(_))
        ));
        session.stop().await;
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn workspace_configuration_answers_each_item() {
        let reply = empty_configuration(json!({"items": [{"section": "a"}, {"section": "b"}]}));
        assert_eq!(reply.unwrap(), json!([null, null]));
        assert_eq!(empty_configuration(Value::Null).unwrap(), json!([]));
    }

    #[cfg(unix)]
    #[test]
    fn initialize_params_carry_root_and_options() {
        let session = Session::new(
            options()
                .with_root("/work/project")
                .with_initialization_options(json!({"verbose": true})),
        );
        let params = session.initialize_params().unwrap();
        assert_eq!(params["rootUri"], "file:///work/project");
        assert_eq!(params["rootPath"], "/work/project");
        assert_eq!(params["workspaceFolders"][0]["name"], "project");
        assert_eq!(params["clientInfo"]["name"], "Nitrate Language Server");
        assert_eq!(params["initializationOptions"]["verbose"], true);
        assert_eq!(
            params["capabilities"]["workspace"]["didChangeWatchedFiles"]["dynamicRegistration"],
            true
        );
    }

    #[test]
    fn initialize_params_without_root() {
        let session = Session::new(options());
        let params = session.initialize_params().unwrap();
        assert!(params["rootUri"].is_null());
        assert!(params["workspaceFolders"].is_null());
        assert!(params.get("initializationOptions").is_none());
    }
}
