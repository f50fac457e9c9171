//! Error types for albums-db

use thiserror::Error;

/// Errors that can occur in queue and database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Bounded queue rejected a submission
    #[error("queue is full ({capacity} tasks)")]
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// A queued task ran past its timeout. Only that task fails; the
    /// queue keeps serving.
    #[error("task exceeded its {timeout:?} timeout")]
    TaskTimeout {
        /// Configured timeout
        timeout: std::time::Duration,
    },

    /// The task was removed by `clear()` before it ran
    #[error("task cleared from queue before it ran")]
    QueueCleared,

    /// A transaction body failed and was rolled back
    #[error("transaction rolled back: {source}")]
    Transaction {
        /// Error raised inside the transaction
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite-level error outside a transaction
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be converted back into a domain event
    #[error("invalid stored record: {0}")]
    Decode(String),

    /// The blocking-pool task backing a database call failed
    #[error("background task failed: {0}")]
    Background(String),
}

impl DbError {
    /// Create a new Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}
