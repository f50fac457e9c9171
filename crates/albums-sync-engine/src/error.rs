//! Error types for albums-sync-engine

use std::path::PathBuf;

use thiserror::Error;

use albums_core::ParseError;
use albums_db::DbError;
use albums_storage::StorageError;

/// Errors surfaced by the engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Log store or file reading failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Log text could not be parsed into events
    #[error("log parse error: {0}")]
    Parse(#[from] ParseError),

    /// Database queue or SQL failure
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// A backup folder or sidecar failed validation
    #[error("backup validation failed: {0}")]
    Validation(String),

    /// Import aborted before any mutation
    #[error("import failed: {0}")]
    Import(String),

    /// Writing export or backup files failed
    #[error("export failed at {path}: {source}")]
    Export {
        /// File or directory being written
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Restoring a backup failed
    #[error("rollback failed: {0}")]
    Rollback(String),
}

impl EngineError {
    /// Create a new Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new Import error
    pub fn import(message: impl Into<String>) -> Self {
        Self::Import(message.into())
    }

    /// Create a new Rollback error
    pub fn rollback(message: impl Into<String>) -> Self {
        Self::Rollback(message.into())
    }

    /// Create a new Export error
    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Export {
            path: path.into(),
            source,
        }
    }
}
