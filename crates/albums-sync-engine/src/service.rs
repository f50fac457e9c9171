//! The engine facade
//!
//! One [`AlbumsEngine`] instance owns a store, a database, and the
//! services wired over them. Nothing is global: every instance is built
//! from an explicit [`EngineConfig`] and torn down with
//! [`AlbumsEngine::close`], so tests and embedders can run several
//! side by side.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::info;

use albums_core::LogLine;
use albums_db::{Database, DbLogProvider, DbQueueConfig, LogRecordRepository};
use albums_storage::{
    AppendSummary, LogLineReader, LogLineReaderConfig, LogStore, LogStoreConfig, StorageError,
};

use crate::backup::{BackupMetadata, BackupService};
use crate::error::EngineError;
use crate::export::{ExportManifest, ExportService};
use crate::import::{ImportReport, ImportService};
use crate::photo::PhotoEventProvider;
use crate::rollback::{RollbackReport, RollbackService};
use crate::sync::{SyncMode, SyncOrchestrator, SyncReport};

/// Filesystem and queue layout of one engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the partitioned log store
    pub store_root: PathBuf,
    /// Where user-requested exports land
    pub export_root: PathBuf,
    /// Where pre-import backups land
    pub backup_root: PathBuf,
    /// SQLite database file
    pub db_path: PathBuf,
    /// File reader tuning
    pub reader: LogLineReaderConfig,
    /// Database queue tuning
    pub queue: DbQueueConfig,
}

impl EngineConfig {
    /// Conventional layout under a single data directory
    pub fn under(data_root: impl Into<PathBuf>) -> Self {
        let root = data_root.into();
        Self {
            store_root: root.join("logStore"),
            export_root: root.join("exports"),
            backup_root: root.join("backups"),
            db_path: root.join("albums.db"),
            reader: LogLineReaderConfig::default(),
            queue: DbQueueConfig::default(),
        }
    }
}

/// The assembled engine: store, database, and the services over them
pub struct AlbumsEngine {
    db: Database,
    store: Arc<LogStore>,
    repository: LogRecordRepository,
    sync: SyncOrchestrator,
    exports: ExportService,
    backups: BackupService,
    imports: ImportService,
    rollbacks: RollbackService,
}

impl AlbumsEngine {
    /// Open every component under the given layout
    pub async fn open(config: EngineConfig) -> Result<Self, EngineError> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Storage(StorageError::io(parent, e)))?;
        }

        let store = Arc::new(LogStore::new(LogStoreConfig::new(&config.store_root)));
        let db = Database::open_with_queue(&config.db_path, config.queue.clone()).await?;
        let repository = LogRecordRepository::new(db.clone());
        let reader = LogLineReader::new(config.reader.clone());

        let sync = SyncOrchestrator::new(Arc::clone(&store), reader.clone(), repository.clone());
        let exports = ExportService::new(&config.export_root);
        let backups = BackupService::new(&config.backup_root);
        let imports = ImportService::new(
            Arc::clone(&store),
            reader.clone(),
            backups.clone(),
            sync.clone(),
        );
        let rollbacks = RollbackService::new(
            Arc::clone(&store),
            reader,
            repository.clone(),
            backups.clone(),
        );

        info!(store = %config.store_root.display(), "Engine opened");
        Ok(Self {
            db,
            store,
            repository,
            sync,
            exports,
            backups,
            imports,
            rollbacks,
        })
    }

    /// The canonical log store
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// The log record repository
    pub fn repository(&self) -> &LogRecordRepository {
        &self.repository
    }

    /// Append raw client log lines to the canonical store
    pub async fn append_log_lines(&self, lines: &[LogLine]) -> Result<AppendSummary, EngineError> {
        Ok(self.store.append(lines).await?)
    }

    /// Synchronize the database from the log store
    pub async fn sync_logs(
        &self,
        mode: SyncMode,
        photos: &dyn PhotoEventProvider,
    ) -> Result<SyncReport, EngineError> {
        self.sync.sync(mode, photos).await
    }

    /// Export records read from `provider` as a portable log store
    /// tree. Pass [`Self::repository`] to export this engine's own
    /// database.
    pub async fn export_log_store(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        provider: &dyn DbLogProvider,
    ) -> Result<ExportManifest, EngineError> {
        self.exports.export(start, end, provider).await
    }

    /// Import external log store files, backing up `provider`'s records
    /// first
    pub async fn import_log_store_files(
        &self,
        paths: &[PathBuf],
        provider: &dyn DbLogProvider,
        photos: &dyn PhotoEventProvider,
    ) -> Result<ImportReport, EngineError> {
        self.imports.import(paths, provider, photos).await
    }

    /// Restore a backup over the live store and rebuild the database
    pub async fn rollback_to_backup(
        &self,
        backup: &BackupMetadata,
        photos: &dyn PhotoEventProvider,
    ) -> Result<RollbackReport, EngineError> {
        self.rollbacks.rollback(backup, photos).await
    }

    /// All known backups, newest first
    pub async fn backup_history(&self) -> Result<Vec<BackupMetadata>, EngineError> {
        self.backups.backup_history().await
    }

    /// Look up one backup by id
    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupMetadata>, EngineError> {
        self.backups.get_backup(id).await
    }

    /// Drain the database queue and shut down
    pub async fn close(self) {
        self.db.close().await;
    }
}
