//! # Albums Sync Engine
//!
//! The orchestration layer of the vrchat-albums log engine. It wires
//! the partitioned text store and the database behind four public
//! operations:
//!
//! - **sync**: extract events from the store and persist them, in FULL
//!   or INCREMENTAL mode ([`SyncOrchestrator`]);
//! - **export**: render database records back into a portable log
//!   store tree ([`ExportService`]);
//! - **import**: merge another installation's store, always behind a
//!   fresh backup ([`ImportService`]);
//! - **rollback**: restore a backup and rebuild the database from it
//!   ([`RollbackService`]).
//!
//! [`AlbumsEngine`] assembles all of it from one [`EngineConfig`].
//! External concerns (photo metadata, database reads for export) sit
//! behind object-safe traits so embedders plug in their own.

pub mod backup;
pub mod error;
pub mod export;
pub mod import;
pub mod photo;
pub mod rollback;
pub mod service;
pub mod sync;

// Re-exports
pub use backup::{BackupMetadata, BackupService, BackupStatus, METADATA_FILE_NAME};
pub use error::EngineError;
pub use export::{EXPORT_FOLDER_PREFIX, ExportManifest, ExportService};
pub use import::{ImportReport, ImportService};
pub use photo::{NoopPhotoProvider, PhotoEventProvider};
pub use rollback::{RollbackReport, RollbackService};
pub use service::{AlbumsEngine, EngineConfig};
pub use sync::{SYNC_BATCH_SIZE, SyncMode, SyncOrchestrator, SyncReport};
