//! Streaming, memory-bounded log line reading
//!
//! Files are processed in fixed-size concurrent groups. Before each
//! group the process memory gauge is consulted; crossing the ceiling is
//! fatal and no further output is produced.
//!
//! Two read modes exist:
//!
//! - **strict** ([`LogLineReader::read_batches`]): a pull-based, finite,
//!   non-restartable stream of line batches; the first per-file error
//!   aborts the whole operation.
//! - **partial-success** ([`LogLineReader::read_partial`]): per-file
//!   errors are collected and reading continues; the call only
//!   hard-fails when zero files succeeded while at least one errored.

use std::path::PathBuf;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use futures::future;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, trace, warn};

use albums_core::LogLine;

use crate::error::StorageError;
use crate::memory::{MemoryGauge, ProcessMemoryGauge, check_memory};

/// Configuration for [`LogLineReader`]
#[derive(Debug, Clone)]
pub struct LogLineReaderConfig {
    /// Files read concurrently per group
    pub concurrency: usize,
    /// Lines per emitted batch
    pub batch_size: usize,
    /// Process RSS ceiling in MiB; crossing it aborts the read
    pub max_memory_mb: u64,
}

impl Default for LogLineReaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 1000,
            max_memory_mb: 500,
        }
    }
}

/// Lines successfully read from one file
#[derive(Debug, Clone)]
pub struct FileLines {
    /// Source file
    pub path: PathBuf,
    /// Matching lines in file order
    pub lines: Vec<LogLine>,
}

/// A per-file failure collected in partial-success mode
#[derive(Debug)]
pub struct FileReadError {
    /// File that failed
    pub path: PathBuf,
    /// What went wrong
    pub error: StorageError,
}

/// Outcome of a partial-success read: data plus collected errors
#[derive(Debug, Default)]
pub struct PartialRead {
    /// Per-file line groups, in input order
    pub files: Vec<FileLines>,
    /// Per-file failures
    pub errors: Vec<FileReadError>,
}

impl PartialRead {
    /// Total matching lines across all successful files
    pub fn total_lines(&self) -> usize {
        self.files.iter().map(|f| f.lines.len()).sum()
    }
}

/// Streaming reader over a set of log files
#[derive(Clone)]
pub struct LogLineReader {
    config: LogLineReaderConfig,
    gauge: Arc<dyn MemoryGauge>,
}

impl LogLineReader {
    /// Create a reader with the process memory gauge
    pub fn new(config: LogLineReaderConfig) -> Self {
        Self::with_gauge(config, Arc::new(ProcessMemoryGauge))
    }

    /// Create a reader with an injected memory gauge
    pub fn with_gauge(config: LogLineReaderConfig, gauge: Arc<dyn MemoryGauge>) -> Self {
        Self { config, gauge }
    }

    /// Strict mode: stream batches of matching lines.
    ///
    /// The stream is finite and not restartable. Batches hold exactly
    /// `batch_size` lines except the final remainder. The first per-file
    /// error ends the stream with that error; a failed memory check ends
    /// it with [`StorageError::MemoryLimitExceeded`].
    pub fn read_batches(
        &self,
        paths: Vec<PathBuf>,
        filters: Vec<String>,
    ) -> impl Stream<Item = Result<Vec<LogLine>, StorageError>> + 'static {
        let config = self.config.clone();
        let gauge = Arc::clone(&self.gauge);

        try_stream! {
            let group_size = config.concurrency.max(1);
            let mut buffer: Vec<LogLine> = Vec::new();

            for group in paths.chunks(group_size) {
                check_memory(gauge.as_ref(), config.max_memory_mb)?;

                let reads = group.iter().map(|path| read_file(path.clone(), &filters));
                for lines in future::join_all(reads).await {
                    buffer.extend(lines?);
                    while buffer.len() >= config.batch_size {
                        let batch: Vec<LogLine> = buffer.drain(..config.batch_size).collect();
                        yield batch;
                    }
                }
            }

            if !buffer.is_empty() {
                yield std::mem::take(&mut buffer);
            }
        }
    }

    /// Partial-success mode: read everything readable, collect the rest.
    ///
    /// The memory guard stays fatal. Hard-fails only when zero files
    /// succeeded while at least one errored.
    pub async fn read_partial(
        &self,
        paths: &[PathBuf],
        filters: &[String],
    ) -> Result<PartialRead, StorageError> {
        let group_size = self.config.concurrency.max(1);
        let mut outcome = PartialRead::default();

        for group in paths.chunks(group_size) {
            check_memory(self.gauge.as_ref(), self.config.max_memory_mb)?;

            let reads = group.iter().map(|path| read_file(path.clone(), filters));
            for (path, result) in group.iter().zip(future::join_all(reads).await) {
                match result {
                    Ok(lines) => outcome.files.push(FileLines {
                        path: path.clone(),
                        lines,
                    }),
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "Skipping unreadable log file");
                        outcome.errors.push(FileReadError {
                            path: path.clone(),
                            error,
                        });
                    }
                }
            }
        }

        if outcome.files.is_empty() && !outcome.errors.is_empty() {
            return Err(StorageError::AllFilesFailed {
                failed: outcome.errors.len(),
            });
        }

        debug!(
            files = outcome.files.len(),
            failed = outcome.errors.len(),
            lines = outcome.total_lines(),
            "Partial read complete"
        );
        Ok(outcome)
    }
}

/// Read one file as a line stream, retaining lines that match at least
/// one include filter (or every line when no filters are given).
async fn read_file(path: PathBuf, filters: &[String]) -> Result<Vec<LogLine>, StorageError> {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| StorageError::io(&path, e))?;

    let mut lines = Vec::new();
    let mut reader = tokio::io::BufReader::new(file).lines();
    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| StorageError::io(&path, e))?
    {
        if line.is_empty() {
            continue;
        }
        if filters.is_empty() || filters.iter().any(|f| line.contains(f.as_str())) {
            lines.push(LogLine::new(line));
        }
    }

    trace!(path = %path.display(), matched = lines.len(), "Read log file");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedMemoryGauge;
    use futures::StreamExt;
    use std::path::Path;
    use tempfile::TempDir;

    async fn write_lines(dir: &Path, name: &str, count: usize) -> PathBuf {
        let path = dir.join(name);
        let mut body = String::new();
        for i in 0..count {
            body.push_str(&format!(
                "2024.03.15 10:00:{:02} Log        -  [Behaviour] OnPlayerJoined P{i}\n",
                i % 60
            ));
        }
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    fn reader(batch_size: usize) -> LogLineReader {
        LogLineReader::new(LogLineReaderConfig {
            batch_size,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn batches_flush_at_batch_size_with_remainder() {
        let dir = TempDir::new().unwrap();
        let a = write_lines(dir.path(), "a.txt", 1500).await;
        let b = write_lines(dir.path(), "b.txt", 1000).await;

        let stream = reader(1000).read_batches(vec![a, b], vec![]);
        tokio::pin!(stream);

        let mut sizes = Vec::new();
        while let Some(batch) = stream.next().await {
            sizes.push(batch.unwrap().len());
        }
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn filters_drop_unmatched_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.txt");
        tokio::fs::write(
            &path,
            "2024.03.15 10:00:00 Log        -  [Behaviour] OnPlayerJoined Alice\n\
             2024.03.15 10:00:01 Log        -  unrelated noise\n\
             2024.03.15 10:00:02 Log        -  [Behaviour] OnPlayerLeft Alice\n",
        )
        .await
        .unwrap();

        let stream = reader(10).read_batches(vec![path], vec!["[Behaviour]".to_string()]);
        tokio::pin!(stream);
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn memory_limit_is_fatal_before_any_batch() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(dir.path(), "a.txt", 10).await;

        let reader = LogLineReader::with_gauge(
            LogLineReaderConfig {
                max_memory_mb: 500,
                ..Default::default()
            },
            Arc::new(FixedMemoryGauge(600 * 1024 * 1024)),
        );

        let stream = reader.read_batches(vec![path], vec![]);
        tokio::pin!(stream);
        let first = stream.next().await.unwrap();
        assert!(matches!(
            first,
            Err(StorageError::MemoryLimitExceeded { .. })
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn strict_mode_aborts_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let good = write_lines(dir.path(), "good.txt", 5).await;
        let missing = dir.path().join("missing.txt");

        let stream = reader(1000).read_batches(vec![missing, good], vec![]);
        tokio::pin!(stream);
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(StorageError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn partial_mode_collects_errors_and_continues() {
        let dir = TempDir::new().unwrap();
        let good = write_lines(dir.path(), "good.txt", 5).await;
        let missing = dir.path().join("missing.txt");

        let outcome = reader(1000)
            .read_partial(&[missing.clone(), good], &[])
            .await
            .unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path, missing);
        assert_eq!(outcome.total_lines(), 5);
    }

    #[tokio::test]
    async fn partial_mode_fails_when_everything_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.txt");

        let err = reader(1000)
            .read_partial(&[missing], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AllFilesFailed { failed: 1 }));
    }
}
