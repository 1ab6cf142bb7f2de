//! Error types for `openapi-explorer-index`.

use std::fmt;
use thiserror::Error;

/// Failure reported by the external fetch collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("network error fetching '{url}': {message}")]
    Network { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("HTTP status {status} fetching '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// The request did not complete in time.
    #[error("timed out after {timeout_secs}s fetching '{url}'")]
    Timeout { url: String, timeout_secs: u64 },

    /// The document body exceeded the configured size limit.
    #[error("document at '{url}' exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },
}

/// What kind of thing a [`IndexError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Api,
    Endpoint,
    Model,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotFoundKind::Api => "API",
            NotFoundKind::Endpoint => "Endpoint",
            NotFoundKind::Model => "Model",
        })
    }
}

/// Main error type for indexing and querying.
///
/// Every variant is `Clone` so a single failed build can be handed to all callers that were
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Malformed source document (bad JSON/YAML, or not shaped like an `OpenAPI` 3 document).
    #[error("failed to parse OpenAPI document: {0}")]
    Parse(String),

    /// The document declares a version this engine does not handle (e.g. Swagger 2.0).
    #[error("unsupported OpenAPI version '{0}' (only 3.x documents are supported)")]
    UnsupportedVersion(String),

    /// A `$ref` could not be resolved. Recorded per field; never aborts a build.
    #[error("unresolved $ref '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{kind} '{identifier}' not found{}", api_suffix(.api))]
    NotFound {
        kind: NotFoundKind,
        identifier: String,
        api: Option<String>,
    },

    /// Malformed filter / pagination arguments.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The build task was cancelled or panicked.
    #[error("index build aborted: {0}")]
    Aborted(String),
}

impl IndexError {
    #[must_use]
    pub fn api_not_found(api: impl Into<String>) -> Self {
        IndexError::NotFound {
            kind: NotFoundKind::Api,
            identifier: api.into(),
            api: None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound { .. })
    }
}

fn api_suffix(api: &Option<String>) -> String {
    api.as_ref()
        .map(|a| format!(" in API '{a}'"))
        .unwrap_or_default()
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
