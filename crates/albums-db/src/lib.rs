//! # Albums DB
//!
//! Database access for the vrchat-albums log engine.
//!
//! The backing store is single-writer SQLite, so every database touch —
//! reads included — funnels through one [`DbQueue`] choke point to keep
//! relative ordering between reads and writes. [`Database`] owns the
//! connection and runs queued work on the blocking pool; the
//! [`LogRecordRepository`] on top provides idempotent batch inserts
//! (unique keys make duplicate inserts no-ops) and the per-category
//! checkpoint queries that drive incremental sync.
//!
//! Nothing here is a module singleton: a `Database` is constructed with
//! explicit config and torn down with [`Database::close`], so tests can
//! spin up isolated instances freely.

pub mod database;
pub mod error;
pub mod queue;
pub mod repository;

// Re-exports
pub use database::Database;
pub use error::DbError;
pub use queue::{DbQueue, DbQueueConfig};
pub use repository::{Checkpoints, DbLogProvider, EventCounts, LogRecordRepository};
