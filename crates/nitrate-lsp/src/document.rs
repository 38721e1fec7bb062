//! Document selection and text synchronization.
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::trace;
use url::Url;

use crate::error::LspError;
use crate::session::Session;

/// Matches any value in a [`DocumentFilter`] field.
pub const WILDCARD: &str = "*";

/// One `(scheme, language)` filter. A missing field or `"*"` matches
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// URI scheme, e.g. `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Language id, e.g. `rust`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl DocumentFilter {
    /// A filter on both fields. Pass [`WILDCARD`] to accept any value.
    pub fn new(scheme: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            language: Some(language.into()),
        }
    }

    /// Whether both fields accept the document.
    pub fn matches(&self, scheme: &str, language: &str) -> bool {
        field_matches(self.scheme.as_deref(), scheme)
            && field_matches(self.language.as_deref(), language)
    }
}

fn field_matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None | Some(WILDCARD) => true,
        Some(pattern) => pattern == value,
    }
}

/// A list of filters; a document is selected when any filter matches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSelector(pub Vec<DocumentFilter>);

impl DocumentSelector {
    /// A selector over `filters`.
    pub fn new(filters: Vec<DocumentFilter>) -> Self {
        Self(filters)
    }

    /// Whether any filter accepts the document.
    pub fn matches(&self, scheme: &str, language: &str) -> bool {
        matches(self, scheme, language)
    }

    /// The filters, in order.
    pub fn filters(&self) -> &[DocumentFilter] {
        &self.0
    }
}

impl Default for DocumentSelector {
    /// `file` documents in the `nitrate` language.
    fn default() -> Self {
        Self(vec![DocumentFilter::new("file", "nitrate")])
    }
}

/// Whether any filter in `selector` matches the document.
pub fn matches(selector: &DocumentSelector, scheme: &str, language: &str) -> bool {
    selector
        .0
        .iter()
        .any(|filter| filter.matches(scheme, language))
}

/// A document as the editor sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl TextDocumentItem {
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            version,
            text: text.into(),
        }
    }

    /// A document backed by a file on disk.
    pub fn from_path(
        path: &Path,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Result<Self, LspError> {
        Ok(Self::new(file_uri(path)?, language_id, version, text))
    }

    /// The URI scheme, or `""` when the URI does not parse.
    pub fn scheme(&self) -> &str {
        match self.uri.split_once(':') {
            Some((scheme, _)) if Url::parse(&self.uri).is_ok() => scheme,
            _ => "",
        }
    }
}

/// Convert an absolute path to a `file://` URI.
pub fn file_uri(path: &Path) -> Result<String, LspError> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|_| LspError::InvalidPath(path.to_path_buf()))
}

impl Session {
    fn selects(&self, document: &TextDocumentItem) -> bool {
        let selected = self.handles(document.scheme(), &document.language_id);
        if !selected {
            trace!(uri = %document.uri, language = %document.language_id, "document not selected");
        }
        selected
    }

    /// Send `textDocument/didOpen`. Returns `false` when the document is
    /// outside the selector.
    pub async fn did_open(&self, document: &TextDocumentItem) -> Result<bool, LspError> {
        if !self.selects(document) {
            return Ok(false);
        }
        self.send_notification("textDocument/didOpen", json!({ "textDocument": document }))
            .await?;
        Ok(true)
    }

    /// Send `textDocument/didChange` with the full new text.
    pub async fn did_change(&self, document: &TextDocumentItem) -> Result<bool, LspError> {
        if !self.selects(document) {
            return Ok(false);
        }
        let params = json!({
            "textDocument": { "uri": document.uri, "version": document.version },
            "contentChanges": [{ "text": document.text }],
        });
        self.send_notification("textDocument/didChange", params)
            .await?;
        Ok(true)
    }

    /// Send `textDocument/didSave`.
    pub async fn did_save(&self, document: &TextDocumentItem) -> Result<bool, LspError> {
        if !self.selects(document) {
            return Ok(false);
        }
        self.send_notification(
            "textDocument/didSave",
            json!({ "textDocument": { "uri": document.uri } }),
        )
        .await?;
        Ok(true)
    }

    /// Send `textDocument/didClose`.
    pub async fn did_close(&self, document: &TextDocumentItem) -> Result<bool, LspError> {
        if !self.selects(document) {
            return Ok(false);
        }
        self.send_notification(
            "textDocument/didClose",
            json!({ "textDocument": { "uri": document.uri } }),
        )
        .await?;
        Ok(true)
    }
}
