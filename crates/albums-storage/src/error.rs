//! Error types for albums-storage

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in reader and store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error with the path it happened on
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File or directory the operation touched
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Process memory crossed the configured ceiling. Fatal: the
    /// operation that raised it yields no further output.
    #[error("memory limit exceeded: {used_mb} MB used, {limit_mb} MB allowed")]
    MemoryLimitExceeded {
        /// Resident set size at check time
        used_mb: u64,
        /// Configured ceiling
        limit_mb: u64,
    },

    /// Every file in a partial-success read failed
    #[error("all {failed} file(s) failed to read")]
    AllFilesFailed {
        /// Number of files that errored
        failed: usize,
    },
}

impl StorageError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
