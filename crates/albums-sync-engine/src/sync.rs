//! Database synchronization
//!
//! The orchestrator is state-free per call: every run recomputes its
//! window from the database checkpoints, reads the matching partition
//! files, extracts events, and persists them in sequential batches.
//! Inside one batch the three event categories are written
//! concurrently; batch N+1 never starts before batch N finishes.
//!
//! Idempotence comes from the database unique keys, not from any
//! bookkeeping here — running the same sync twice inserts zero rows the
//! second time.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{info, instrument, warn};

use albums_core::{LogEvent, parse_lines};
use albums_db::LogRecordRepository;
use albums_storage::{LogLineReader, LogStore};

use crate::error::EngineError;
use crate::photo::PhotoEventProvider;

/// Events persisted per sequential batch
pub const SYNC_BATCH_SIZE: usize = 1000;

/// Substring filters applied at the file reader; lines matching none of
/// these can never produce a persisted event.
pub(crate) fn message_filters() -> Vec<String> {
    ["[Behaviour] Joining", "[Behaviour] OnPlayer", "[Behaviour] OnLeftRoom"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Everything-since epoch for a full rebuild
pub(crate) fn full_sync_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .expect("valid epoch date")
        .and_hms_opt(0, 0, 0)
        .expect("valid epoch time")
}

/// How much history a sync run considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Everything since 2000-01-01, legacy single-file store included
    Full,
    /// Only events newer than the per-category checkpoints; an empty
    /// database falls back to one year of history
    Incremental,
}

/// Outcome of one sync run
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Mode this run used
    pub mode: SyncMode,
    /// Start of the considered window
    pub window_start: NaiveDateTime,
    /// Files parsed successfully
    pub files_read: usize,
    /// Files skipped (unreadable or unparseable)
    pub files_failed: usize,
    /// Raw lines without a usable timestamp or message
    pub skipped_lines: usize,
    /// Events extracted before checkpoint filtering
    pub events_seen: usize,
    /// Sequential persist batches executed
    pub batches: usize,
    /// New world join rows
    pub world_joins_inserted: usize,
    /// New player join rows
    pub player_joins_inserted: usize,
    /// New player leave rows
    pub player_leaves_inserted: usize,
    /// Photos handled by the collaborator after the batch loop
    pub photos_processed: usize,
}

impl SyncReport {
    fn empty(mode: SyncMode, window_start: NaiveDateTime) -> Self {
        Self {
            mode,
            window_start,
            files_read: 0,
            files_failed: 0,
            skipped_lines: 0,
            events_seen: 0,
            batches: 0,
            world_joins_inserted: 0,
            player_joins_inserted: 0,
            player_leaves_inserted: 0,
            photos_processed: 0,
        }
    }

    /// Rows inserted across all categories
    pub fn total_inserted(&self) -> usize {
        self.world_joins_inserted + self.player_joins_inserted + self.player_leaves_inserted
    }
}

/// Stateless synchronizer from the log store into the database
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<LogStore>,
    reader: LogLineReader,
    repository: LogRecordRepository,
    batch_size: usize,
}

impl SyncOrchestrator {
    /// Create an orchestrator over the given store and repository
    pub fn new(store: Arc<LogStore>, reader: LogLineReader, repository: LogRecordRepository) -> Self {
        Self {
            store,
            reader,
            repository,
            batch_size: SYNC_BATCH_SIZE,
        }
    }

    /// Run one sync pass.
    ///
    /// Unreadable or unparseable files are warned about and skipped;
    /// the run only hard-fails when no file could be processed at all.
    /// The photo collaborator is invoked once, after the last batch.
    #[instrument(skip_all, fields(mode = ?mode))]
    pub async fn sync(
        &self,
        mode: SyncMode,
        photos: &dyn PhotoEventProvider,
    ) -> Result<SyncReport, EngineError> {
        let now = chrono::Local::now().naive_local();
        let checkpoints = self.repository.checkpoints().await?;
        let window_start = match mode {
            SyncMode::Full => full_sync_epoch(),
            SyncMode::Incremental => checkpoints
                .latest()
                .unwrap_or_else(|| now - Duration::days(365)),
        };
        let include_legacy = mode == SyncMode::Full;

        let paths = self
            .store
            .range_query(window_start, now, include_legacy)
            .await?;
        let partial = self.reader.read_partial(&paths, &message_filters()).await?;

        let mut report = SyncReport::empty(mode, window_start);
        report.files_failed = partial.errors.len();

        let mut events: Vec<LogEvent> = Vec::new();
        let mut last_parse_error = None;
        for file in &partial.files {
            match parse_lines(&file.lines) {
                Ok(extraction) => {
                    report.files_read += 1;
                    report.skipped_lines += extraction.skipped_lines;
                    events.extend(extraction.events);
                }
                Err(error) => {
                    warn!(path = %file.path.display(), %error, "Skipping unparseable log file");
                    report.files_failed += 1;
                    last_parse_error = Some(error);
                }
            }
        }
        // Tolerate bad files while at least one parsed; escalate the
        // last cause when everything failed.
        if report.files_read == 0
            && let Some(error) = last_parse_error
        {
            return Err(EngineError::Parse(error));
        }

        report.events_seen = events.len();
        events.retain(|event| match event {
            // World leaves exist only as raw text markers.
            LogEvent::WorldLeave { .. } => false,
            LogEvent::WorldJoin(e) => keep(mode, checkpoints.world_join, e.joined_at),
            LogEvent::PlayerJoin(e) => keep(mode, checkpoints.player_join, e.joined_at),
            LogEvent::PlayerLeave(e) => keep(mode, checkpoints.player_leave, e.left_at),
        });

        for batch in events.chunks(self.batch_size) {
            let mut worlds = Vec::new();
            let mut joins = Vec::new();
            let mut leaves = Vec::new();
            for event in batch {
                match event {
                    LogEvent::WorldJoin(e) => worlds.push(e.clone()),
                    LogEvent::PlayerJoin(e) => joins.push(e.clone()),
                    LogEvent::PlayerLeave(e) => leaves.push(e.clone()),
                    LogEvent::WorldLeave { .. } => {}
                }
            }
            let (worlds, joins, leaves) = tokio::join!(
                self.repository.insert_world_joins(worlds),
                self.repository.insert_player_joins(joins),
                self.repository.insert_player_leaves(leaves),
            );
            report.world_joins_inserted += worlds?;
            report.player_joins_inserted += joins?;
            report.player_leaves_inserted += leaves?;
            report.batches += 1;
        }

        report.photos_processed = photos.sync_photos().await?;

        info!(
            files = report.files_read,
            failed = report.files_failed,
            events = report.events_seen,
            inserted = report.total_inserted(),
            batches = report.batches,
            "Log sync complete"
        );
        Ok(report)
    }
}

/// Incremental mode keeps only events strictly newer than their own
/// category's checkpoint
fn keep(mode: SyncMode, checkpoint: Option<NaiveDateTime>, at: NaiveDateTime) -> bool {
    match (mode, checkpoint) {
        (SyncMode::Incremental, Some(newest)) => at > newest,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use albums_db::Database;
    use albums_storage::{LogLineReaderConfig, LogStoreConfig};
    use chrono::Duration;
    use tempfile::TempDir;

    use crate::photo::NoopPhotoProvider;

    async fn orchestrator(dir: &TempDir) -> SyncOrchestrator {
        let store = Arc::new(LogStore::new(LogStoreConfig::new(dir.path())));
        let db = Database::open_in_memory().await.unwrap();
        SyncOrchestrator::new(
            store,
            LogLineReader::new(LogLineReaderConfig::default()),
            LogRecordRepository::new(db),
        )
    }

    fn join_lines(count: usize) -> Vec<albums_core::LogLine> {
        let base: NaiveDateTime = "2024-03-01T00:00:00".parse().unwrap();
        (0..count)
            .map(|i| {
                let at = base + Duration::seconds(i as i64);
                albums_core::LogLine::new(format!(
                    "{} Log        -  [Behaviour] OnPlayerJoined P{i}",
                    at.format("%Y.%m.%d %H:%M:%S")
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn events_persist_in_batches_of_one_thousand() {
        let dir = TempDir::new().unwrap();
        let sync = orchestrator(&dir).await;
        sync.store.append(&join_lines(2500)).await.unwrap();

        let report = sync.sync(SyncMode::Full, &NoopPhotoProvider).await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.player_joins_inserted, 2500);
    }

    #[tokio::test]
    async fn second_incremental_sync_inserts_nothing() {
        let dir = TempDir::new().unwrap();
        let sync = orchestrator(&dir).await;
        sync.store.append(&join_lines(10)).await.unwrap();

        let first = sync.sync(SyncMode::Full, &NoopPhotoProvider).await.unwrap();
        assert_eq!(first.total_inserted(), 10);

        let second = sync
            .sync(SyncMode::Incremental, &NoopPhotoProvider)
            .await
            .unwrap();
        assert_eq!(second.total_inserted(), 0);
    }

    #[tokio::test]
    async fn world_leaves_are_never_persisted() {
        let dir = TempDir::new().unwrap();
        let sync = orchestrator(&dir).await;
        sync.store
            .append(&[albums_core::LogLine::new(
                "2024.03.01 10:00:00 Log        -  [Behaviour] OnLeftRoom",
            )])
            .await
            .unwrap();

        let report = sync.sync(SyncMode::Full, &NoopPhotoProvider).await.unwrap();
        assert_eq!(report.events_seen, 1);
        assert_eq!(report.total_inserted(), 0);
    }
}
