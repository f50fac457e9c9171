//! Pre-import backups
//!
//! A backup is an unbounded export of the database plus a
//! `backup-metadata.json` sidecar describing it. The sidecar is the
//! only mutable piece: import stamps its sources into it, rollback
//! flips the status. The status transition completed → rolled_back is
//! one-way; nothing ever sets a backup back to completed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use albums_db::DbLogProvider;

use crate::error::EngineError;
use crate::export::ExportService;

/// Sidecar file name inside every backup folder
pub const METADATA_FILE_NAME: &str = "backup-metadata.json";

/// Lifecycle of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Created and intact
    Completed,
    /// Restored over the live store; terminal
    RolledBack,
}

/// The `backup-metadata.json` sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Unique backup id
    pub id: String,
    /// When the backup export started
    pub backup_timestamp: DateTime<Utc>,
    /// Folder holding the exported partitions and this sidecar
    pub export_folder_path: PathBuf,
    /// Files the subsequent import pulled from
    pub source_files: Vec<PathBuf>,
    /// Lifecycle status
    pub status: BackupStatus,
    /// When the import that triggered this backup ran
    pub import_timestamp: Option<DateTime<Utc>>,
    /// Lines captured by the export
    pub total_log_lines: usize,
    /// Files the export wrote
    pub exported_files: Vec<PathBuf>,
}

impl BackupMetadata {
    /// Flip the status to rolled back. There is no inverse.
    pub fn mark_rolled_back(&mut self) {
        self.status = BackupStatus::RolledBack;
    }

    /// Where this backup's sidecar lives
    pub fn metadata_path(&self) -> PathBuf {
        self.export_folder_path.join(METADATA_FILE_NAME)
    }
}

/// Creates and tracks pre-import backups under one root
#[derive(Debug, Clone)]
pub struct BackupService {
    backup_root: PathBuf,
    exporter: ExportService,
}

impl BackupService {
    /// Service keeping backups under the given root
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        let backup_root = backup_root.into();
        Self {
            exporter: ExportService::new(&backup_root),
            backup_root,
        }
    }

    /// Export the entire database and write its sidecar.
    ///
    /// An empty database produces a valid, empty backup.
    pub async fn create_pre_import_backup(
        &self,
        provider: &dyn DbLogProvider,
    ) -> Result<BackupMetadata, EngineError> {
        let manifest = self.exporter.export(None, None, provider).await?;

        let suffix: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let metadata = BackupMetadata {
            id: format!("backup_{}_{suffix}", Utc::now().format("%Y%m%d%H%M%S")),
            backup_timestamp: manifest.started_at,
            export_folder_path: manifest.export_dir,
            source_files: Vec::new(),
            status: BackupStatus::Completed,
            import_timestamp: None,
            total_log_lines: manifest.total_lines,
            exported_files: manifest.files,
        };
        self.update_metadata(&metadata).await?;

        info!(
            id = %metadata.id,
            lines = metadata.total_log_lines,
            "Created pre-import backup"
        );
        Ok(metadata)
    }

    /// Rewrite a backup's sidecar in place
    pub async fn update_metadata(&self, metadata: &BackupMetadata) -> Result<(), EngineError> {
        let path = metadata.metadata_path();
        let body = serde_json::to_string_pretty(metadata)
            .map_err(|e| EngineError::validation(format!("unserializable backup metadata: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| EngineError::export(&path, e))
    }

    /// All known backups, newest first. Folders with a missing or
    /// unparseable sidecar are skipped with a warning.
    pub async fn backup_history(&self) -> Result<Vec<BackupMetadata>, EngineError> {
        if !self.backup_root.exists() {
            return Ok(Vec::new());
        }

        let mut history = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.backup_root)
            .await
            .map_err(|e| EngineError::export(&self.backup_root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::export(&self.backup_root, e))?
        {
            let sidecar = entry.path().join(METADATA_FILE_NAME);
            if !sidecar.exists() {
                continue;
            }
            match read_metadata(&sidecar).await {
                Ok(metadata) => history.push(metadata),
                Err(error) => {
                    warn!(path = %sidecar.display(), %error, "Skipping unparseable backup sidecar");
                }
            }
        }

        history.sort_by(|a, b| b.backup_timestamp.cmp(&a.backup_timestamp));
        Ok(history)
    }

    /// Look up one backup by id
    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupMetadata>, EngineError> {
        Ok(self
            .backup_history()
            .await?
            .into_iter()
            .find(|metadata| metadata.id == id))
    }
}

async fn read_metadata(path: &Path) -> Result<BackupMetadata, EngineError> {
    let body = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::export(path, e))?;
    serde_json::from_str(&body)
        .map_err(|e| EngineError::validation(format!("bad backup sidecar: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    use albums_core::{LogEvent, PlayerJoinEvent};
    use albums_db::DbError;

    struct FixedProvider(Vec<LogEvent>);

    #[async_trait]
    impl DbLogProvider for FixedProvider {
        async fn records(
            &self,
            _start: Option<NaiveDateTime>,
            _end: Option<NaiveDateTime>,
        ) -> Result<Vec<LogEvent>, DbError> {
            Ok(self.0.clone())
        }
    }

    fn provider() -> FixedProvider {
        FixedProvider(vec![LogEvent::PlayerJoin(PlayerJoinEvent {
            joined_at: "2024-03-15T10:00:00".parse().unwrap(),
            player_name: "Alice".to_string(),
            player_id: None,
        })])
    }

    #[tokio::test]
    async fn sidecar_uses_camel_case_fields() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());

        let metadata = service.create_pre_import_backup(&provider()).await.unwrap();
        let body = tokio::fs::read_to_string(metadata.metadata_path())
            .await
            .unwrap();
        assert!(body.contains("\"backupTimestamp\""));
        assert!(body.contains("\"exportFolderPath\""));
        assert!(body.contains("\"completed\""));
        assert!(!body.contains("\"backup_timestamp\""));
    }

    #[tokio::test]
    async fn empty_database_still_backs_up() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());

        let metadata = service
            .create_pre_import_backup(&FixedProvider(Vec::new()))
            .await
            .unwrap();
        assert_eq!(metadata.total_log_lines, 0);
        assert_eq!(metadata.status, BackupStatus::Completed);
        assert!(metadata.metadata_path().exists());
    }

    #[tokio::test]
    async fn history_skips_garbage_and_sorts_newest_first() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());

        let first = service.create_pre_import_backup(&provider()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = service.create_pre_import_backup(&provider()).await.unwrap();

        // A folder with a corrupt sidecar must not break the listing.
        let garbage = dir.path().join("broken");
        tokio::fs::create_dir_all(&garbage).await.unwrap();
        tokio::fs::write(garbage.join(METADATA_FILE_NAME), "not json")
            .await
            .unwrap();

        let history = service.backup_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);

        let found = service.get_backup(&first.id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(service.get_backup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_flip_survives_a_sidecar_rewrite() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());

        let mut metadata = service.create_pre_import_backup(&provider()).await.unwrap();
        metadata.mark_rolled_back();
        metadata.import_timestamp = Some(Utc::now());
        service.update_metadata(&metadata).await.unwrap();

        let reloaded = service.get_backup(&metadata.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BackupStatus::RolledBack);
        assert!(reloaded.import_timestamp.is_some());
    }
}
