//! The monthly-partitioned append-only log store
//!
//! This is the system's source of truth. Lines are grouped by the month
//! embedded in their own timestamp (wall clock only as a fallback) and
//! appended to `<yyyy-MM>/logStore-<yyyy-MM>.txt`. Once the write target
//! reaches the size cap, writes move to a new timestamp-suffixed sibling
//! instead of growing the file. An exact line is never written twice
//! within a partition, so appends are idempotent. Nothing is ever
//! deleted or compacted here.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use albums_core::{LogLine, MonthKey};

use crate::error::StorageError;

/// Name of the pre-partitioning single-file store
pub const LEGACY_FILE_NAME: &str = "logStore.txt";

/// Default rotation threshold: 10 MiB
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for [`LogStore`]
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Root of the partition tree
    pub root: PathBuf,
    /// Size at which a partition file stops accepting writes
    pub max_file_bytes: u64,
}

impl LogStoreConfig {
    /// Config rooted at the given directory with the default size cap
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// Outcome of an append call
#[derive(Debug, Clone, Default)]
pub struct AppendSummary {
    /// Lines actually written
    pub appended: usize,
    /// Lines skipped because the partition already held them
    pub duplicates: usize,
    /// Partitions touched by this call
    pub partitions: Vec<MonthKey>,
}

/// The canonical partitioned text store
pub struct LogStore {
    config: LogStoreConfig,
}

impl LogStore {
    /// Create a store over the given config. Directories are created
    /// lazily on first append.
    pub fn new(config: LogStoreConfig) -> Self {
        Self { config }
    }

    /// Root of the partition tree
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Path of the legacy single-file store, whether or not it exists
    pub fn legacy_path(&self) -> PathBuf {
        self.config.root.join(LEGACY_FILE_NAME)
    }

    /// Directory of one month's partition
    pub fn partition_dir(&self, month: MonthKey) -> PathBuf {
        self.config.root.join(month.to_string())
    }

    /// Primary file of one month's partition
    pub fn primary_file(&self, month: MonthKey) -> PathBuf {
        self.partition_dir(month)
            .join(format!("logStore-{month}.txt"))
    }

    /// Append lines, deduplicated per partition.
    ///
    /// Lines are bucketed by their embedded month; lines whose timestamp
    /// cannot be parsed fall back to the current month. Appending the
    /// same lines twice leaves the tree byte-identical to appending once.
    #[instrument(skip_all, fields(lines = lines.len()))]
    pub async fn append(&self, lines: &[LogLine]) -> Result<AppendSummary, StorageError> {
        let current = MonthKey::current();
        let mut buckets: BTreeMap<MonthKey, Vec<&LogLine>> = BTreeMap::new();
        for line in lines {
            buckets.entry(line.month().unwrap_or(current)).or_default().push(line);
        }

        let mut summary = AppendSummary::default();
        for (month, bucket) in buckets {
            let (appended, duplicates) = self.append_partition(month, &bucket).await?;
            summary.appended += appended;
            summary.duplicates += duplicates;
            summary.partitions.push(month);
        }

        info!(
            appended = summary.appended,
            duplicates = summary.duplicates,
            partitions = summary.partitions.len(),
            "Appended lines to log store"
        );
        Ok(summary)
    }

    /// Append one month's bucket, returning (appended, duplicates)
    async fn append_partition(
        &self,
        month: MonthKey,
        lines: &[&LogLine],
    ) -> Result<(usize, usize), StorageError> {
        let dir = self.partition_dir(month);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;

        // Every existing line of the partition (all siblings) feeds the
        // dedup set so rotation never reintroduces duplicates.
        let mut seen: HashSet<String> = HashSet::new();
        for path in self.partition_files(month).await? {
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            seen.extend(body.lines().map(str::to_string));
        }

        let mut novel: Vec<&str> = Vec::new();
        let mut duplicates = 0usize;
        for line in lines {
            if seen.insert(line.as_str().to_string()) {
                novel.push(line.as_str());
            } else {
                duplicates += 1;
            }
        }

        if novel.is_empty() {
            return Ok((0, duplicates));
        }

        let target = self.write_target(month).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(|e| StorageError::io(&target, e))?;

        let mut body = String::with_capacity(novel.iter().map(|l| l.len() + 1).sum());
        for line in &novel {
            body.push_str(line);
            body.push('\n');
        }
        file.write_all(body.as_bytes())
            .await
            .map_err(|e| StorageError::io(&target, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&target, e))?;

        debug!(
            partition = %month,
            target = %target.display(),
            appended = novel.len(),
            duplicates = duplicates,
            "Wrote partition"
        );
        Ok((novel.len(), duplicates))
    }

    /// Pick the file the next write goes to: the newest partition file
    /// while it is under the cap, otherwise a fresh timestamp-suffixed
    /// sibling. The full file itself is never touched again.
    async fn write_target(&self, month: MonthKey) -> Result<PathBuf, StorageError> {
        let mut files = self.partition_files(month).await?;
        files.sort();

        let candidate = match files.last() {
            Some(path) => path.clone(),
            None => return Ok(self.primary_file(month)),
        };

        let size = tokio::fs::metadata(&candidate)
            .await
            .map_err(|e| StorageError::io(&candidate, e))?
            .len();
        if size < self.config.max_file_bytes {
            return Ok(candidate);
        }

        let dir = self.partition_dir(month);
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let mut sibling = dir.join(format!("logStore-{month}_{stamp}.txt"));
        let mut counter = 1u32;
        while sibling.exists() {
            sibling = dir.join(format!("logStore-{month}_{stamp}-{counter}.txt"));
            counter += 1;
        }

        info!(
            partition = %month,
            full = %candidate.display(),
            sibling = %sibling.display(),
            "Rotating partition file"
        );
        Ok(sibling)
    }

    /// All files of one partition (primary plus rotation siblings),
    /// discovered by directory scan
    async fn partition_files(&self, month: MonthKey) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.partition_dir(month);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("logStore-{month}");
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(".txt") {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    /// Deduplicated paths of every partition file whose month intersects
    /// `[startOfMonth(start), endOfMonth(end)]`, plus the legacy
    /// single-file store when `include_legacy` is set and it exists.
    pub async fn range_query(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        include_legacy: bool,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths: BTreeSet<PathBuf> = BTreeSet::new();
        for month in MonthKey::range_inclusive(MonthKey::of(start), MonthKey::of(end)) {
            paths.extend(self.partition_files(month).await?);
        }

        if include_legacy {
            let legacy = self.legacy_path();
            if legacy.exists() {
                paths.insert(legacy);
            }
        }

        debug!(files = paths.len(), "Range query resolved");
        Ok(paths.into_iter().collect())
    }
}
