//! External log store import
//!
//! Merges another installation's log store into this one. The order of
//! operations is what makes it safe: sources are collected and a full
//! backup is taken before anything mutates, so a bad import is always
//! recoverable via rollback. After the backup, failures degrade
//! gracefully rather than leaving the store half-written.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, instrument, warn};

use albums_core::LogLine;
use albums_db::DbLogProvider;
use albums_storage::{AppendSummary, LEGACY_FILE_NAME, LogLineReader, LogStore};

use crate::backup::{BackupMetadata, BackupService};
use crate::error::EngineError;
use crate::photo::PhotoEventProvider;
use crate::sync::{SyncMode, SyncOrchestrator, SyncReport};

/// Shapes an importable partition file name may take:
/// `logStore-2024-03.txt` or a rotation sibling
/// `logStore-2024-03_20240315100000[-1].txt`
static STORE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^logStore-\d{4}-\d{2}(_\d+(-\d+)?)?\.txt$").expect("store file regex"));

/// Lines per file checked by the pre-append validation
const VALIDATION_SAMPLE: usize = 10;

/// What an import did
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// The backup taken before any mutation
    pub backup: BackupMetadata,
    /// Source files read successfully
    pub files_imported: usize,
    /// Well-formed lines fed to the store
    pub total_lines: usize,
    /// Lines dropped for having no parsable timestamp or message
    pub invalid_lines: usize,
    /// Store append outcome
    pub append: AppendSummary,
    /// The incremental sync that followed
    pub sync: SyncReport,
}

/// Imports external log store trees
#[derive(Clone)]
pub struct ImportService {
    store: Arc<LogStore>,
    reader: LogLineReader,
    backups: BackupService,
    sync: SyncOrchestrator,
}

impl ImportService {
    /// Wire an import service over the shared components
    pub fn new(
        store: Arc<LogStore>,
        reader: LogLineReader,
        backups: BackupService,
        sync: SyncOrchestrator,
    ) -> Self {
        Self {
            store,
            reader,
            backups,
            sync,
        }
    }

    /// Import log-store-shaped files found under `paths`.
    ///
    /// Files and directories are walked recursively; anything not named
    /// like a log store file is silently skipped. Finding zero
    /// importable files is an error raised before any mutation.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub async fn import(
        &self,
        paths: &[PathBuf],
        provider: &dyn DbLogProvider,
        photos: &dyn PhotoEventProvider,
    ) -> Result<ImportReport, EngineError> {
        let sources = collect_store_files(paths).await?;
        if sources.is_empty() {
            return Err(EngineError::import(
                "no log store files found in the given paths",
            ));
        }

        let mut backup = self.backups.create_pre_import_backup(provider).await?;
        backup.source_files = sources.clone();
        backup.import_timestamp = Some(chrono::Utc::now());
        self.backups.update_metadata(&backup).await?;

        let partial = self.reader.read_partial(&sources, &[]).await?;

        let mut valid: Vec<LogLine> = Vec::new();
        let mut invalid_lines = 0usize;
        for file in &partial.files {
            validate_sample(&file.path, &file.lines);
            for line in &file.lines {
                if line.is_well_formed() {
                    valid.push(line.clone());
                } else {
                    invalid_lines += 1;
                }
            }
        }

        let append = self.store.append(&valid).await?;
        let sync = self.sync.sync(SyncMode::Incremental, photos).await?;

        info!(
            files = partial.files.len(),
            lines = valid.len(),
            invalid_lines,
            appended = append.appended,
            synced = sync.total_inserted(),
            "Import complete"
        );
        Ok(ImportReport {
            backup,
            files_imported: partial.files.len(),
            total_lines: valid.len(),
            invalid_lines,
            append,
            sync,
        })
    }
}

/// Warn-only structural check of each file's first lines
fn validate_sample(path: &Path, lines: &[LogLine]) {
    let malformed = lines
        .iter()
        .take(VALIDATION_SAMPLE)
        .filter(|line| !line.is_well_formed())
        .count();
    if malformed > 0 {
        warn!(
            path = %path.display(),
            malformed,
            "Import source sample contains malformed lines"
        );
    }
}

/// Walk the given paths, keeping only log-store-shaped file names
async fn collect_store_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, EngineError> {
    let mut files = Vec::new();
    let mut stack: Vec<PathBuf> = paths.to_vec();
    while let Some(path) = stack.pop() {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| EngineError::import(format!("cannot stat {}: {e}", path.display())))?;
        if meta.is_dir() {
            let mut entries = tokio::fs::read_dir(&path)
                .await
                .map_err(|e| EngineError::import(format!("cannot read {}: {e}", path.display())))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| EngineError::import(format!("cannot read {}: {e}", path.display())))?
            {
                stack.push(entry.path());
            }
        } else if is_store_file_name(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_store_file_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == LEGACY_FILE_NAME || STORE_FILE_RE.is_match(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_file_names_are_recognized() {
        assert!(is_store_file_name(Path::new("logStore.txt")));
        assert!(is_store_file_name(Path::new("logStore-2024-03.txt")));
        assert!(is_store_file_name(Path::new(
            "logStore-2024-03_20240315100000.txt"
        )));
        assert!(is_store_file_name(Path::new(
            "logStore-2024-03_20240315100000-1.txt"
        )));

        assert!(!is_store_file_name(Path::new("logStore-2024.txt")));
        assert!(!is_store_file_name(Path::new("notes.txt")));
        assert!(!is_store_file_name(Path::new("logStore-2024-03.json")));
    }

    #[tokio::test]
    async fn collection_walks_directories_recursively() {
        let dir = TempDir::new().unwrap();
        let partition = dir.path().join("2024-03");
        tokio::fs::create_dir_all(&partition).await.unwrap();
        tokio::fs::write(partition.join("logStore-2024-03.txt"), "x\n")
            .await
            .unwrap();
        tokio::fs::write(partition.join("README.md"), "skip me\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("logStore.txt"), "y\n")
            .await
            .unwrap();

        let files = collect_store_files(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|file| is_store_file_name(file)));
    }

    #[tokio::test]
    async fn missing_path_fails_collection() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nowhere");
        let err = collect_store_files(&[missing]).await.unwrap_err();
        assert!(matches!(err, EngineError::Import(_)));
    }
}
