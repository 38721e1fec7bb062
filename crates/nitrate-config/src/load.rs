use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// File name of the global config inside the config directory.
pub const CONFIG_FILE_NAME: &str = "client.toml";

/// Directory holding the project-level config.
pub const PROJECT_CONFIG_DIR: &str = ".nitrate";

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# Nitrate language client configuration
# Uncomment and edit settings below to override defaults.

# [server]
# command = "qpkg"
# args = ["lsp", "--log", "~/nitrated-lsp.log", "--no-color"]
# cwd = "/path/to/workspace"

# [client]
# id = "nitrateLanguageServer"
# name = "Nitrate Language Server"
# file_watch = "**/.clientrc"
#
# [[client.document_selector]]
# scheme = "file"
# language = "nitrate"
#
# [client.initialization_options]
# some_option = true

# [lifecycle]
# shutdown_timeout_ms = 5000
# close_grace_ms = 2000
# initialize_timeout_ms = 30000

# [log]
# level = "info"
"#;

/// Load and merge configuration.
///
/// 1. Reads the global config from `config_dir/client.toml`.
///    If the file does not exist it is created with commented-out
///    defaults.
/// 2. Optionally reads a project config from
///    `project_dir/.nitrate/client.toml` (walks upward).
/// 3. Merges: `Config::default() <- global <- project`.
/// 4. Validates the merged result.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or
/// validation failure.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join(CONFIG_FILE_NAME);

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("Created default config at {}", global_path.display());
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!("Merging project config {}", project_path.display());
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    check(&config)?;
    Ok(config)
}

/// Walk from `start` upward looking for `.nitrate/client.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Returns `true` when the content has at least one
/// non-empty, non-comment line.
fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}

fn check(config: &Config) -> Result<(), ConfigError> {
    validate(config).map_err(|errors| {
        for extra in errors.iter().skip(1) {
            tracing::warn!("{}", extra);
        }
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}

/// Parse a TOML string directly into a validated [`Config`].
///
/// Useful for tests or one-off parsing without file I/O.
///
/// # Errors
///
/// Returns [`ConfigError`] on parse or validation failure.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    check(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_config_creates_default_when_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config, Config::default());
        assert!(cfg_dir.join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn load_config_reads_existing_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join(CONFIG_FILE_NAME),
            "[server]\ncommand = \"/opt/qpkg\"\n",
        )
        .unwrap();

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config.server.command, "/opt/qpkg");
        assert_eq!(config.client.file_watch, "**/.clientrc");
    }

    #[test]
    fn load_config_merges_project_over_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join(CONFIG_FILE_NAME),
            "[lifecycle]\nshutdown_timeout_ms = 1000\nclose_grace_ms = 10\n",
        )
        .unwrap();

        let proj_dir = tmp.path().join("project");
        let nitrate_dir = proj_dir.join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&nitrate_dir).unwrap();
        std::fs::write(
            nitrate_dir.join(CONFIG_FILE_NAME),
            "[lifecycle]\nshutdown_timeout_ms = 250\n",
        )
        .unwrap();

        let config = load_config(&cfg_dir, Some(&proj_dir)).unwrap();
        assert_eq!(config.lifecycle.shutdown_timeout_ms, 250);
        assert_eq!(config.lifecycle.close_grace_ms, 10);
    }

    #[test]
    fn load_config_rejects_invalid_project_values() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        let proj_dir = tmp.path().join("project");
        let nitrate_dir = proj_dir.join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&nitrate_dir).unwrap();
        std::fs::write(nitrate_dir.join(CONFIG_FILE_NAME), "[client]\nid = \"\"\n").unwrap();

        let err = load_config(&cfg_dir, Some(&proj_dir)).unwrap_err();
        assert!(err.to_string().contains("client.id"));
    }

    #[test]
    fn load_from_str_parses_valid_toml() {
        let config = load_from_str("[log]\nlevel = \"trace\"\n").unwrap();
        assert_eq!(config.log.level, crate::config::LogLevel::Trace);
    }

    #[test]
    fn load_from_str_rejects_invalid_toml() {
        assert!(matches!(
            load_from_str("{{bad}}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_str_rejects_invalid_values() {
        let result = load_from_str("[server]\ncommand = \"\"\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn find_project_config_walks_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let nitrate = root.join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&nitrate).unwrap();
        std::fs::write(nitrate.join(CONFIG_FILE_NAME), "[log]\nlevel = \"debug\"\n").unwrap();

        let deep = root.join("src").join("module");
        std::fs::create_dir_all(&deep).unwrap();

        let found = find_project_config(&deep).unwrap();
        assert!(found.ends_with(".nitrate/client.toml"));
    }

    #[test]
    fn default_config_content_is_comment_only() {
        assert!(!has_non_comment_content(DEFAULT_CONFIG_CONTENT));
    }

    #[test]
    fn default_template_uncommented_is_valid() {
        let uncommented: String = DEFAULT_CONFIG_CONTENT
            .lines()
            .skip(2)
            .map(|l| l.strip_prefix("# ").unwrap_or(l.trim_start_matches('#')))
            .collect::<Vec<_>>()
            .join("\n");
        let config = load_from_str(&uncommented).unwrap();
        assert_eq!(config.server.command, "qpkg");
        assert_eq!(config.lifecycle.initialize_timeout_ms, Some(30000));
    }

    #[test]
    fn has_non_comment_content_detects_values() {
        assert!(!has_non_comment_content(""));
        assert!(!has_non_comment_content("# comment\n"));
        assert!(has_non_comment_content("# comment\n[log]\n"));
    }
}
