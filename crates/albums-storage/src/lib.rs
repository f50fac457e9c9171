//! # Albums Storage
//!
//! Durable text storage for the vrchat-albums log engine.
//!
//! Two pieces live here:
//!
//! - **[`LogLineReader`]**: streaming, memory-bounded, batched extraction
//!   of matching lines from log files. Files are read in fixed-size
//!   concurrent groups; a process-memory check runs before every group
//!   and aborts the whole read when the configured ceiling is crossed.
//! - **[`LogStore`]**: the canonical monthly-partitioned append-only
//!   store. Appends are idempotent (exact duplicate lines are never
//!   written twice within a partition) and files rotate to
//!   timestamp-suffixed siblings once they reach the size cap. Nothing
//!   here ever deletes or compacts.
//!
//! The database downstream is a derived cache over this store, never the
//! other way around.

pub mod error;
pub mod memory;
pub mod reader;
pub mod store;

// Re-exports
pub use error::StorageError;
pub use memory::{FixedMemoryGauge, MemoryGauge, ProcessMemoryGauge};
pub use reader::{FileLines, FileReadError, LogLineReader, LogLineReaderConfig, PartialRead};
pub use store::{AppendSummary, LEGACY_FILE_NAME, LogStore, LogStoreConfig};
