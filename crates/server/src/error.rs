//! Error types for the MCP service layer.

use openapi_explorer_index::IndexError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reading, validating or persisting API registrations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid registration: {0}")]
    Invalid(String),

    #[error("failed to read registry file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write registry file '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by [`crate::explorer::Explorer`] operations.
#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ExplorerError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExplorerError::Index(e) if e.is_not_found())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ExplorerError>;
