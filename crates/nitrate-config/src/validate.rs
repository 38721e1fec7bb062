use globset::GlobBuilder;

use crate::config::Config;
use crate::error::ConfigError;

fn violation(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        message: message.into(),
    }
}

/// Validate a [`Config`], returning all detected violations.
///
/// Returns `Ok(())` when the config is valid, or `Err` with a
/// vector of every validation error found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.server.command.trim().is_empty() {
        errors.push(violation("server.command", "must not be empty"));
    }

    if config.client.id.trim().is_empty() {
        errors.push(violation("client.id", "must not be empty"));
    }

    if config.client.document_selector.is_empty() {
        errors.push(violation(
            "client.document_selector",
            "must contain at least one entry",
        ));
    }
    for (i, entry) in config.client.document_selector.iter().enumerate() {
        let blank = |field: &Option<String>| field.as_deref().map_or(true, str::is_empty);
        if blank(&entry.scheme) && blank(&entry.language) {
            errors.push(violation(
                format!("client.document_selector[{i}]"),
                "needs a scheme or a language",
            ));
        }
    }

    if let Err(e) = GlobBuilder::new(&config.client.file_watch)
        .literal_separator(true)
        .build()
    {
        errors.push(violation("client.file_watch", e.to_string()));
    }

    if config.lifecycle.shutdown_timeout_ms == 0 {
        errors.push(violation("lifecycle.shutdown_timeout_ms", "must be > 0"));
    }
    if config.lifecycle.initialize_timeout_ms == Some(0) {
        errors.push(violation(
            "lifecycle.initialize_timeout_ms",
            "must be > 0 when set",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
