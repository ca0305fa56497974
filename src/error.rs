//! Error types for the embedding index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.
//!
//! Nothing in this subsystem is fatal to the host: every failure path
//! degrades to "search returns fewer results" or "index temporarily stale".

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read index data at '{path}': {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write index data at '{path}': {source}")]
    SnapshotWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// Vector layer errors
    #[error("Vector operation failed: {0}")]
    Vector(#[from] crate::vector::VectorError),

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in structured responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::SnapshotRead { .. } => "SNAPSHOT_READ_ERROR",
            Self::SnapshotWrite { .. } => "SNAPSHOT_WRITE_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::Vector(_) => "VECTOR_ERROR",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }
}
