//! Error types for Bindery.
//!
//! Two error types mirror the two failure scopes of an export:
//!
//! * [`BinderyError`]: the job cannot continue (no typesetting engine, no
//!   merge tool, unreadable config, I/O on the output path). Library crates
//!   return it via `thiserror`; the CLI wraps it with `color-eyre`.
//! * [`ItemError`]: a single item could not be normalized. It is recorded in
//!   the job's `failed_items` and the export moves on to the next item.

use std::path::PathBuf;

use crate::types::FailureKind;

/// Top-level error type for all Bindery operations.
#[derive(Debug, thiserror::Error)]
pub enum BinderyError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of item normalization.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad project snapshot, unknown job, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// No typesetting engine could be found for the requested format.
    #[error("no typesetting engine available: {0}")]
    EngineUnavailable(String),

    /// Every candidate engine failed on a batch.
    #[error("rendering failed after trying {attempts} engine(s): {last_error}")]
    RenderFailure { attempts: usize, last_error: String },

    /// Several components need merging but no merge tool is installed.
    #[error("no PDF merge tool available to combine {components} components (tried: {tried})")]
    MergeToolUnavailable { components: usize, tried: String },

    /// Merge tools were found but every one of them failed.
    #[error("PDF merge failed: {0}")]
    MergeFailure(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BinderyError>;

impl BinderyError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failure scoped to one item. Never aborts the export.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ItemError {
    /// Network or HTTP failure while fetching the item's source.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The server answered with an anti-bot challenge page.
    #[error("{url} is protected by a bot challenge ({marker}); save the page manually and upload it instead")]
    BotProtection { url: String, marker: String },

    /// The item's local file could not be located.
    #[error("local file not found: {reference}")]
    MissingLocalFile { reference: String },

    /// Conversion of the fetched or local content failed.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// The document contains no extractable text (scanned or image-only).
    #[error("no extractable text in {file} (scanned or image-only document?)")]
    NoExtractableText { file: String },
}

impl ItemError {
    /// Machine-readable failure category recorded in `failed_items`.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch { .. } => FailureKind::FetchError,
            Self::BotProtection { .. } => FailureKind::BotProtection,
            Self::MissingLocalFile { .. } => FailureKind::MissingLocalFile,
            Self::Conversion(_) => FailureKind::ConversionError,
            Self::NoExtractableText { .. } => FailureKind::NoExtractableText,
        }
    }

    /// Shorthand for a fetch failure.
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<BinderyError> for ItemError {
    fn from(err: BinderyError) -> Self {
        match err {
            BinderyError::Network(reason) => Self::Fetch {
                url: String::new(),
                reason,
            },
            other => Self::Conversion(other.to_string()),
        }
    }
}
