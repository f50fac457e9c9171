//! Backup restoration
//!
//! Restores a backup over the live log store, then rebuilds the
//! database from the restored tree. The restored partitions are read
//! and parsed *before* the database is touched, and the table clear
//! plus rebuild run inside a single queue transaction — a rollback
//! that fails partway leaves the derived tables exactly as they were.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use albums_core::{LogEvent, MonthKey, parse_lines};
use albums_db::{EventCounts, LogRecordRepository};
use albums_storage::{LEGACY_FILE_NAME, LogLineReader, LogStore};

use crate::backup::{BackupMetadata, BackupService, METADATA_FILE_NAME};
use crate::error::EngineError;
use crate::photo::PhotoEventProvider;
use crate::sync::{full_sync_epoch, message_filters};

/// What a rollback did
#[derive(Debug, Clone)]
pub struct RollbackReport {
    /// The backup, with its status flipped to rolled back
    pub backup: BackupMetadata,
    /// Month partitions copied back successfully
    pub restored_partitions: usize,
    /// Month partitions that could not be copied
    pub failed_partitions: usize,
    /// Rows inserted per table by the transactional rebuild
    pub rebuilt: EventCounts,
}

/// Restores backups over the live store
#[derive(Clone)]
pub struct RollbackService {
    store: Arc<LogStore>,
    reader: LogLineReader,
    repository: LogRecordRepository,
    backups: BackupService,
}

impl RollbackService {
    /// Wire a rollback service over the shared components
    pub fn new(
        store: Arc<LogStore>,
        reader: LogLineReader,
        repository: LogRecordRepository,
        backups: BackupService,
    ) -> Self {
        Self {
            store,
            reader,
            repository,
            backups,
        }
    }

    /// Restore the given backup.
    ///
    /// Validation happens before anything is touched. Partition copies
    /// are best-effort per directory; the rollback as a whole succeeds
    /// as long as at least one partition came back. The database is
    /// only mutated once the restored tree has parsed, and then in one
    /// transaction.
    #[instrument(skip_all, fields(backup = %backup.id))]
    pub async fn rollback(
        &self,
        backup: &BackupMetadata,
        photos: &dyn PhotoEventProvider,
    ) -> Result<RollbackReport, EngineError> {
        let partitions = validate_backup_dir(&backup.export_folder_path).await?;

        self.clear_store_dir().await?;

        let mut restored = 0usize;
        let mut failed = 0usize;
        for partition in &partitions {
            match restore_partition(partition, self.store.root()).await {
                Ok(()) => restored += 1,
                Err(error) => {
                    warn!(
                        partition = %partition.display(),
                        %error,
                        "Failed to restore partition"
                    );
                    failed += 1;
                }
            }
        }
        if restored == 0 {
            return Err(EngineError::rollback(format!(
                "no partitions could be restored ({failed} failed)"
            )));
        }

        let events = self.read_restored_events().await?;
        let rebuilt = self.repository.replace_all(events).await?;

        let mut backup = backup.clone();
        backup.mark_rolled_back();
        self.backups.update_metadata(&backup).await?;

        photos.sync_photos().await?;

        info!(
            restored,
            failed,
            rebuilt = rebuilt.total(),
            "Rollback complete"
        );
        Ok(RollbackReport {
            backup,
            restored_partitions: restored,
            failed_partitions: failed,
            rebuilt,
        })
    }

    /// Read and parse the full restored tree. Bad files are tolerated
    /// while at least one parses; an entirely unparseable restore is an
    /// error raised before any database mutation.
    async fn read_restored_events(&self) -> Result<Vec<LogEvent>, EngineError> {
        let now = chrono::Local::now().naive_local();
        let paths = self.store.range_query(full_sync_epoch(), now, true).await?;
        let partial = self.reader.read_partial(&paths, &message_filters()).await?;

        let mut events = Vec::new();
        let mut parsed_files = 0usize;
        let mut last_parse_error = None;
        for file in &partial.files {
            match parse_lines(&file.lines) {
                Ok(extraction) => {
                    parsed_files += 1;
                    events.extend(extraction.events);
                }
                Err(error) => {
                    warn!(
                        path = %file.path.display(),
                        %error,
                        "Restored file failed to parse"
                    );
                    last_parse_error = Some(error);
                }
            }
        }
        if parsed_files == 0
            && let Some(error) = last_parse_error
        {
            return Err(EngineError::Parse(error));
        }
        Ok(events)
    }

    /// Remove month partitions and the legacy file from the live store.
    /// Anything else under the root is left alone.
    async fn clear_store_dir(&self) -> Result<(), EngineError> {
        let root = self.store.root();
        if !root.exists() {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| rollback_io(root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| rollback_io(root, e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if path.is_dir() && MonthKey::parse(name).is_some() {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| rollback_io(&path, e))?;
            } else if name == LEGACY_FILE_NAME {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| rollback_io(&path, e))?;
            }
        }
        Ok(())
    }
}

fn rollback_io(path: &Path, error: std::io::Error) -> EngineError {
    EngineError::rollback(format!("{}: {error}", path.display()))
}

/// Check the backup folder carries its sidecar and at least one month
/// partition; returns the partition directories.
async fn validate_backup_dir(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    if !dir.join(METADATA_FILE_NAME).exists() {
        return Err(EngineError::validation(format!(
            "{} has no {METADATA_FILE_NAME}",
            dir.display()
        )));
    }

    let mut partitions = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EngineError::validation(format!("cannot read {}: {e}", dir.display())))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::validation(format!("cannot read {}: {e}", dir.display())))?
    {
        let path = entry.path();
        let is_month = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(MonthKey::parse)
            .is_some();
        if path.is_dir() && is_month {
            partitions.push(path);
        }
    }
    if partitions.is_empty() {
        return Err(EngineError::validation(format!(
            "{} holds no month partitions",
            dir.display()
        )));
    }

    partitions.sort();
    Ok(partitions)
}

/// Copy one backed-up month directory into the live store root
async fn restore_partition(source: &Path, store_root: &Path) -> std::io::Result<()> {
    let name = source.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "partition path has no name")
    })?;
    let target = store_root.join(name);
    tokio::fs::create_dir_all(&target).await?;

    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), target.join(entry.file_name())).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_sidecar_fails_validation() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("2024-03"))
            .await
            .unwrap();

        let err = validate_backup_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn backup_without_partitions_fails_validation() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(METADATA_FILE_NAME), "{}")
            .await
            .unwrap();

        let err = validate_backup_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn validation_returns_only_month_directories() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(METADATA_FILE_NAME), "{}")
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("2024-03"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("2024-04"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("scratch"))
            .await
            .unwrap();

        let partitions = validate_backup_dir(dir.path()).await.unwrap();
        assert_eq!(partitions.len(), 2);
    }

    #[tokio::test]
    async fn restore_copies_partition_files() {
        let backup = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let source = backup.path().join("2024-03");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("logStore-2024-03.txt"), "line\n")
            .await
            .unwrap();

        restore_partition(&source, live.path()).await.unwrap();
        let restored = live.path().join("2024-03").join("logStore-2024-03.txt");
        assert_eq!(tokio::fs::read_to_string(restored).await.unwrap(), "line\n");
    }
}
