//! Log store export
//!
//! Renders database records back into log-store-shaped text, one file
//! per month under a fresh timestamped folder. The inverse formatter is
//! exact, so an exported tree re-imports losslessly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, instrument};

use albums_core::{LogLine, MonthKey, format_event};
use albums_db::DbLogProvider;

use crate::error::EngineError;

/// Prefix of every export folder name
pub const EXPORT_FOLDER_PREFIX: &str = "vrchat-albums-export";

/// What an export produced
#[derive(Debug, Clone)]
pub struct ExportManifest {
    /// The freshly created export folder
    pub export_dir: PathBuf,
    /// Written files, one per month
    pub files: Vec<PathBuf>,
    /// Lines written across all files
    pub total_lines: usize,
    /// When the export started
    pub started_at: DateTime<Utc>,
    /// When the export finished
    pub ended_at: DateTime<Utc>,
}

/// Writes database records out as a portable log store tree
#[derive(Debug, Clone)]
pub struct ExportService {
    export_root: PathBuf,
}

impl ExportService {
    /// Service writing under the given root
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
        }
    }

    /// Export records in `[start, end]` (either bound optional).
    ///
    /// An empty range still succeeds, producing a folder with zero
    /// files. Existing folders are never overwritten.
    #[instrument(skip_all)]
    pub async fn export(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        provider: &dyn DbLogProvider,
    ) -> Result<ExportManifest, EngineError> {
        let started_at = Utc::now();
        let events = provider.records(start, end).await?;

        let mut by_month: BTreeMap<MonthKey, Vec<LogLine>> = BTreeMap::new();
        for event in &events {
            by_month
                .entry(event.month())
                .or_default()
                .extend(format_event(event));
        }

        let export_dir = self.create_export_dir().await?;
        let mut files = Vec::new();
        let mut total_lines = 0;
        for (month, lines) in by_month {
            let dir = export_dir.join(month.to_string());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| EngineError::export(&dir, e))?;

            let path = dir.join(format!("logStore-{month}.txt"));
            let mut body = String::new();
            for line in &lines {
                body.push_str(line.as_str());
                body.push('\n');
            }
            tokio::fs::write(&path, body)
                .await
                .map_err(|e| EngineError::export(&path, e))?;

            total_lines += lines.len();
            files.push(path);
        }

        info!(
            export_dir = %export_dir.display(),
            files = files.len(),
            total_lines,
            "Exported log store"
        );
        Ok(ExportManifest {
            export_dir,
            files,
            total_lines,
            started_at,
            ended_at: Utc::now(),
        })
    }

    /// Create a fresh `vrchat-albums-export_<date>_<time>` folder,
    /// uniquified with a counter when the second-resolution name
    /// collides
    async fn create_export_dir(&self) -> Result<PathBuf, EngineError> {
        tokio::fs::create_dir_all(&self.export_root)
            .await
            .map_err(|e| EngineError::export(&self.export_root, e))?;

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let base = format!("{EXPORT_FOLDER_PREFIX}_{stamp}");
        let mut candidate = self.export_root.join(&base);
        let mut counter = 1u32;
        loop {
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = self.export_root.join(format!("{base}-{counter}"));
                    counter += 1;
                }
                Err(e) => return Err(EngineError::export(&candidate, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
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

    fn join(name: &str, at: &str) -> LogEvent {
        LogEvent::PlayerJoin(PlayerJoinEvent {
            joined_at: at.parse().unwrap(),
            player_name: name.to_string(),
            player_id: None,
        })
    }

    #[tokio::test]
    async fn events_group_into_month_files() {
        let dir = TempDir::new().unwrap();
        let service = ExportService::new(dir.path());
        let provider = FixedProvider(vec![
            join("Alice", "2024-03-15T10:00:00"),
            join("Bob", "2024-03-16T10:00:00"),
            join("Carol", "2024-04-01T10:00:00"),
        ]);

        let manifest = service.export(None, None, &provider).await.unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.total_lines, 3);

        let march = manifest.export_dir.join("2024-03").join("logStore-2024-03.txt");
        let body = tokio::fs::read_to_string(&march).await.unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.contains("OnPlayerJoined Alice"));
    }

    #[tokio::test]
    async fn empty_range_yields_empty_folder() {
        let dir = TempDir::new().unwrap();
        let service = ExportService::new(dir.path());

        let manifest = service
            .export(None, None, &FixedProvider(Vec::new()))
            .await
            .unwrap();
        assert!(manifest.files.is_empty());
        assert!(manifest.export_dir.exists());
    }

    #[tokio::test]
    async fn same_second_exports_get_distinct_folders() {
        let dir = TempDir::new().unwrap();
        let service = ExportService::new(dir.path());
        let provider = FixedProvider(Vec::new());

        let first = service.export(None, None, &provider).await.unwrap();
        let second = service.export(None, None, &provider).await.unwrap();
        assert_ne!(first.export_dir, second.export_dir);
        assert!(second.export_dir.exists());
    }
}
