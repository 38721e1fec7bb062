mod logging;

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use nitrate_config::{load_config, Config};
use nitrate_lsp::{
    ChangeForwarder, ClientInfo, DocumentFilter, DocumentSelector, FileChangeType, FileEvent,
    ServerCommand, Session, SessionEvent, SessionOptions, TextDocumentItem, WatchPattern,
};

const FILE_EVENT_QUEUE: usize = 256;

/// Command-line options.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config_dir: Option<PathBuf>,
    project: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        let slot = match arg.as_str() {
            "--config-dir" => &mut parsed.config_dir,
            "--project" => &mut parsed.project,
            other => bail!("unknown argument: {}", other),
        };
        let value = args
            .next()
            .ok_or_else(|| anyhow!("{} needs a directory", arg))?;
        *slot = Some(PathBuf::from(value));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentAction {
    Open,
    Change,
    Save,
    Close,
}

/// One line of stdin.
#[derive(Debug, PartialEq)]
enum Input {
    File(FileEvent),
    Document(DocumentAction, PathBuf),
}

/// Parse `<verb> <path>`; blank lines yield `None`.
fn parse_input(line: &str) -> Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, path) = line
        .split_once(char::is_whitespace)
        .map(|(verb, path)| (verb, PathBuf::from(path.trim())))
        .ok_or_else(|| anyhow!("expected `<verb> <path>`, got `{}`", line))?;
    let input = match verb {
        "created" => Input::File(FileEvent::new(path, FileChangeType::Created)),
        "changed" => Input::File(FileEvent::new(path, FileChangeType::Changed)),
        "deleted" => Input::File(FileEvent::new(path, FileChangeType::Deleted)),
        "open" => Input::Document(DocumentAction::Open, path),
        "change" => Input::Document(DocumentAction::Change, path),
        "save" => Input::Document(DocumentAction::Save, path),
        "close" => Input::Document(DocumentAction::Close, path),
        other => bail!("unknown verb: {}", other),
    };
    Ok(Some(input))
}

fn session_options(config: &Config, root: PathBuf) -> Result<SessionOptions> {
    let mut command = ServerCommand::new(config.server.command.clone())
        .with_args(config.server.expanded_args());
    if let Some(cwd) = config.server.expanded_cwd() {
        command = command.with_cwd(cwd);
    }

    let selector = DocumentSelector::new(
        config
            .client
            .document_selector
            .iter()
            .map(|entry| DocumentFilter {
                scheme: entry.scheme.clone(),
                language: entry.language.clone(),
            })
            .collect(),
    );

    let mut options = SessionOptions::new(command)
        .with_root(root)
        .with_selector(selector)
        .with_client_info(ClientInfo {
            id: config.client.id.clone(),
            name: config.client.name.clone(),
            ..ClientInfo::default()
        })
        .with_shutdown_timeout(config.lifecycle.shutdown_timeout())
        .with_close_grace(config.lifecycle.close_grace());
    if let Some(limit) = config.lifecycle.initialize_timeout() {
        options = options.with_initialize_timeout(limit);
    }
    if let Some(table) = &config.client.initialization_options {
        let value = serde_json::to_value(table).context("invalid initialization_options")?;
        options = options.with_initialization_options(value);
    }
    Ok(options)
}

fn init_logging(config: &Config) -> Result<()> {
    let path = config
        .log
        .file
        .clone()
        .unwrap_or_else(logging::default_log_file_path);
    logging::ensure_log_dir(&path)
        .with_context(|| format!("failed to create log directory for {}", path.display()))?;
    if let Err(e) = logging::rotate_log_files(
        &path,
        logging::DEFAULT_MAX_LOG_SIZE,
        logging::DEFAULT_MAX_LOG_FILES,
    ) {
        eprintln!("nitrate-client: log rotation failed: {}", e);
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging::log_level_to_filter(&config.log.level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn log_diagnostics(params: Value) {
    let uri = params["uri"].as_str().unwrap_or("<unknown>");
    let count = params["diagnostics"].as_array().map_or(0, Vec::len);
    info!(uri, count, "diagnostics published");
}

/// Tracks document versions for `open`/`change` lines.
struct Documents {
    language_id: String,
    versions: HashMap<PathBuf, i32>,
}

impl Documents {
    fn new(config: &Config) -> Self {
        let language_id = config
            .client
            .document_selector
            .iter()
            .find_map(|entry| entry.language.clone())
            .filter(|language| language != "*")
            .unwrap_or_else(|| "nitrate".to_string());
        Self {
            language_id,
            versions: HashMap::new(),
        }
    }

    async fn apply(&mut self, session: &Session, action: DocumentAction, path: &Path) -> Result<()> {
        let path = match session.root() {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        };
        let version = match action {
            DocumentAction::Open => *self.versions.entry(path.clone()).or_insert(1),
            DocumentAction::Change => {
                let version = self.versions.entry(path.clone()).or_insert(0);
                *version += 1;
                *version
            }
            DocumentAction::Save => self.versions.get(&path).copied().unwrap_or(1),
            DocumentAction::Close => self.versions.remove(&path).unwrap_or(1),
        };
        let text = match action {
            DocumentAction::Open | DocumentAction::Change => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            DocumentAction::Save | DocumentAction::Close => String::new(),
        };
        let document = TextDocumentItem::from_path(&path, self.language_id.clone(), version, text)?;
        let sent = match action {
            DocumentAction::Open => session.did_open(&document).await?,
            DocumentAction::Change => session.did_change(&document).await?,
            DocumentAction::Save => session.did_save(&document).await?,
            DocumentAction::Close => session.did_close(&document).await?,
        };
        debug!(?action, uri = %document.uri, sent, "document event");
        Ok(())
    }
}

async fn run(args: Args) -> Result<()> {
    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .map(|dir| dir.join("nitrate"))
            .context("failed to detect config directory")?,
    };
    let project = match args.project {
        Some(dir) => dir,
        None => env::current_dir().context("failed to read current directory")?,
    };
    let root = project
        .canonicalize()
        .with_context(|| format!("invalid project directory: {}", project.display()))?;

    let config = load_config(&config_dir, Some(&root)).context("failed to load config")?;
    init_logging(&config)?;

    let options = session_options(&config, root)?;
    if let Some(server_log) = logging::server_log_file(&options.command.args) {
        if let Err(e) = logging::ensure_log_dir(&server_log) {
            warn!("cannot create server log directory for {}: {}", server_log.display(), e);
        }
    }
    let session = Arc::new(Session::new(options));
    session
        .on_notification("textDocument/publishDiagnostics", log_diagnostics)
        .await;

    if let Err(e) = session.start().await {
        for line in session.stderr_tail() {
            eprintln!("server: {}", line);
        }
        return Err(e).context("failed to start language server");
    }
    if let Some(server) = session.server_info() {
        info!(name = %server.name, version = ?server.version, "server ready");
    }

    let pattern = WatchPattern::new(&config.client.file_watch)?;
    let (file_tx, file_rx) = mpsc::channel(FILE_EVENT_QUEUE);
    let forwarding = ChangeForwarder::new(pattern).spawn(Arc::clone(&session), file_rx);

    let mut documents = Documents::new(&config);
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match parse_input(&line) {
                    Ok(Some(Input::File(event))) => {
                        if file_tx.send(event).await.is_err() {
                            warn!("file event forwarder stopped");
                        }
                    }
                    Ok(Some(Input::Document(action, path))) => {
                        if let Err(e) = documents.apply(&session, action, &path).await {
                            error!("{:#}", e);
                            eprintln!("nitrate-client: {:#}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("nitrate-client: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Failed { reason }) => {
                    outcome = Err(anyhow!("language server failed: {}", reason));
                    break;
                }
                Ok(SessionEvent::StateChanged(state)) => debug!(?state, "session state"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    drop(file_tx);
    session.stop().await;
    if let Err(e) = forwarding.await {
        warn!("file event forwarder panicked: {}", e);
    }
    outcome
}

fn main() {
    let result = parse_args(env::args().skip(1)).and_then(|args| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start runtime")?
            .block_on(run(args))
    });

    if let Err(e) = result {
        eprintln!("nitrate-client: {:#}", e);
        std::process::exit(1);
    }
}
