//! Log record repository
//!
//! Read/write contract over the derived event tables. Inserts use
//! `INSERT OR IGNORE` against the unique keys — (instance, joined_at)
//! for worlds, (name, timestamp) for players — so re-persisting the same
//! event is a no-op, not an error. The per-category checkpoint queries
//! here drive incremental sync.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{Connection, params};
use tracing::debug;

use albums_core::{LogEvent, PlayerJoinEvent, PlayerLeaveEvent, WorldId, WorldJoinEvent};

use crate::database::Database;
use crate::error::DbError;

/// Storage layout for timestamps; lexicographic order matches
/// chronological order so SQL MAX/range comparisons stay correct.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const RANGE_MIN: &str = "0000-01-01 00:00:00";
const RANGE_MAX: &str = "9999-12-31 23:59:59";

fn encode_dt(at: NaiveDateTime) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

fn decode_dt(raw: &str) -> Result<NaiveDateTime, DbError> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map_err(|e| DbError::decode(format!("bad timestamp {raw:?}: {e}")))
}

/// Latest persisted timestamp per event category.
///
/// Recomputed by querying the database each run — never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checkpoints {
    /// Newest world join, if any
    pub world_join: Option<NaiveDateTime>,
    /// Newest player join, if any
    pub player_join: Option<NaiveDateTime>,
    /// Newest player leave, if any
    pub player_leave: Option<NaiveDateTime>,
}

impl Checkpoints {
    /// Max across all categories
    pub fn latest(&self) -> Option<NaiveDateTime> {
        [self.world_join, self.player_join, self.player_leave]
            .into_iter()
            .flatten()
            .max()
    }
}

/// Row counts per event table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    /// Rows in world_join_logs
    pub world_joins: u64,
    /// Rows in player_join_logs
    pub player_joins: u64,
    /// Rows in player_leave_logs
    pub player_leaves: u64,
}

impl EventCounts {
    /// Sum across all tables
    pub fn total(&self) -> u64 {
        self.world_joins + self.player_joins + self.player_leaves
    }
}

/// Read access to persisted log records, used by export and backup
#[async_trait]
pub trait DbLogProvider: Send + Sync {
    /// Events within `[start, end]` (either bound optional), sorted by
    /// timestamp
    async fn records(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LogEvent>, DbError>;
}

/// Repository over the three derived event tables
#[derive(Clone)]
pub struct LogRecordRepository {
    db: Database,
}

impl LogRecordRepository {
    /// Wrap a database handle
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert world joins; duplicates (same instance + timestamp) are
    /// skipped. Returns rows actually inserted.
    pub async fn insert_world_joins(&self, events: Vec<WorldJoinEvent>) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO world_join_logs \
                         (world_id, world_instance_id, world_name, joined_at) \
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for e in &events {
                        inserted += stmt.execute(params![
                            e.world_id.as_str(),
                            e.instance_id,
                            e.world_name,
                            encode_dt(e.joined_at),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        debug!(inserted, "Persisted world joins");
        Ok(inserted)
    }

    /// Insert player joins; duplicates (same name + timestamp) are
    /// skipped. Returns rows actually inserted.
    pub async fn insert_player_joins(&self, events: Vec<PlayerJoinEvent>) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO player_join_logs \
                         (player_name, player_id, joined_at) VALUES (?1, ?2, ?3)",
                    )?;
                    for e in &events {
                        inserted += stmt.execute(params![
                            e.player_name,
                            e.player_id,
                            encode_dt(e.joined_at),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        debug!(inserted, "Persisted player joins");
        Ok(inserted)
    }

    /// Insert player leaves; duplicates are skipped
    pub async fn insert_player_leaves(
        &self,
        events: Vec<PlayerLeaveEvent>,
    ) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO player_leave_logs \
                         (player_name, player_id, left_at) VALUES (?1, ?2, ?3)",
                    )?;
                    for e in &events {
                        inserted += stmt.execute(params![
                            e.player_name,
                            e.player_id,
                            encode_dt(e.left_at),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        debug!(inserted, "Persisted player leaves");
        Ok(inserted)
    }

    /// Latest persisted timestamp per category
    pub async fn checkpoints(&self) -> Result<Checkpoints, DbError> {
        let (world, join, leave) = self
            .db
            .call(|conn| {
                Ok((
                    max_timestamp(conn, "SELECT MAX(joined_at) FROM world_join_logs")?,
                    max_timestamp(conn, "SELECT MAX(joined_at) FROM player_join_logs")?,
                    max_timestamp(conn, "SELECT MAX(left_at) FROM player_leave_logs")?,
                ))
            })
            .await?;

        Ok(Checkpoints {
            world_join: world.as_deref().map(decode_dt).transpose()?,
            player_join: join.as_deref().map(decode_dt).transpose()?,
            player_leave: leave.as_deref().map(decode_dt).transpose()?,
        })
    }

    /// Row counts per table
    pub async fn counts(&self) -> Result<EventCounts, DbError> {
        self.db
            .call(|conn| {
                Ok(EventCounts {
                    world_joins: count_rows(conn, "SELECT COUNT(*) FROM world_join_logs")?,
                    player_joins: count_rows(conn, "SELECT COUNT(*) FROM player_join_logs")?,
                    player_leaves: count_rows(conn, "SELECT COUNT(*) FROM player_leave_logs")?,
                })
            })
            .await
    }

    /// Events in `[start, end]` across all three tables, sorted by
    /// timestamp
    pub async fn events_between(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LogEvent>, DbError> {
        let lo = start.map_or_else(|| RANGE_MIN.to_string(), encode_dt);
        let hi = end.map_or_else(|| RANGE_MAX.to_string(), encode_dt);

        let (worlds, joins, leaves) = self
            .db
            .call(move |conn| {
                let worlds = {
                    let mut stmt = conn.prepare(
                        "SELECT world_id, world_instance_id, world_name, joined_at \
                         FROM world_join_logs WHERE joined_at >= ?1 AND joined_at <= ?2",
                    )?;
                    let rows = stmt.query_map(params![lo, hi], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                let joins = {
                    let mut stmt = conn.prepare(
                        "SELECT player_name, player_id, joined_at \
                         FROM player_join_logs WHERE joined_at >= ?1 AND joined_at <= ?2",
                    )?;
                    let rows = stmt.query_map(params![lo, hi], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                let leaves = {
                    let mut stmt = conn.prepare(
                        "SELECT player_name, player_id, left_at \
                         FROM player_leave_logs WHERE left_at >= ?1 AND left_at <= ?2",
                    )?;
                    let rows = stmt.query_map(params![lo, hi], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                Ok((worlds, joins, leaves))
            })
            .await?;

        let mut events = Vec::with_capacity(worlds.len() + joins.len() + leaves.len());
        for (world_id, instance_id, world_name, at) in worlds {
            events.push(LogEvent::WorldJoin(WorldJoinEvent {
                joined_at: decode_dt(&at)?,
                world_id: WorldId::parse(&world_id).map_err(|e| DbError::decode(e.to_string()))?,
                instance_id,
                world_name,
            }));
        }
        for (player_name, player_id, at) in joins {
            events.push(LogEvent::PlayerJoin(PlayerJoinEvent {
                joined_at: decode_dt(&at)?,
                player_name,
                player_id,
            }));
        }
        for (player_name, player_id, at) in leaves {
            events.push(LogEvent::PlayerLeave(PlayerLeaveEvent {
                left_at: decode_dt(&at)?,
                player_name,
                player_id,
            }));
        }
        events.sort_by_key(LogEvent::timestamp);
        Ok(events)
    }

    /// Replace every derived row with the given events, in one queue
    /// transaction. Rollback uses this so a failure anywhere leaves the
    /// tables exactly as they were. World-leave markers are skipped.
    /// Returns rows inserted per category.
    pub async fn replace_all(&self, events: Vec<LogEvent>) -> Result<EventCounts, DbError> {
        let counts = self
            .db
            .transaction(move |tx| {
                tx.execute("DELETE FROM world_join_logs", [])?;
                tx.execute("DELETE FROM player_join_logs", [])?;
                tx.execute("DELETE FROM player_leave_logs", [])?;

                let mut worlds = tx.prepare(
                    "INSERT OR IGNORE INTO world_join_logs \
                     (world_id, world_instance_id, world_name, joined_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut joins = tx.prepare(
                    "INSERT OR IGNORE INTO player_join_logs \
                     (player_name, player_id, joined_at) VALUES (?1, ?2, ?3)",
                )?;
                let mut leaves = tx.prepare(
                    "INSERT OR IGNORE INTO player_leave_logs \
                     (player_name, player_id, left_at) VALUES (?1, ?2, ?3)",
                )?;

                let mut counts = EventCounts::default();
                for event in &events {
                    match event {
                        LogEvent::WorldJoin(e) => {
                            counts.world_joins += worlds.execute(params![
                                e.world_id.as_str(),
                                e.instance_id,
                                e.world_name,
                                encode_dt(e.joined_at),
                            ])? as u64;
                        }
                        LogEvent::PlayerJoin(e) => {
                            counts.player_joins += joins.execute(params![
                                e.player_name,
                                e.player_id,
                                encode_dt(e.joined_at),
                            ])? as u64;
                        }
                        LogEvent::PlayerLeave(e) => {
                            counts.player_leaves += leaves.execute(params![
                                e.player_name,
                                e.player_id,
                                encode_dt(e.left_at),
                            ])? as u64;
                        }
                        LogEvent::WorldLeave { .. } => {}
                    }
                }
                Ok(counts)
            })
            .await?;
        debug!(rebuilt = counts.total(), "Replaced derived tables");
        Ok(counts)
    }
}

#[async_trait]
impl DbLogProvider for LogRecordRepository {
    async fn records(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LogEvent>, DbError> {
        self.events_between(start, end).await
    }
}

fn max_timestamp(conn: &Connection, sql: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(sql, [], |row| row.get::<_, Option<String>>(0))
}

fn count_rows(conn: &Connection, sql: &str) -> Result<u64, rusqlite::Error> {
    conn.query_row(sql, [], |row| row.get::<_, u64>(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn join(name: &str, at: &str) -> PlayerJoinEvent {
        PlayerJoinEvent {
            joined_at: ts(at),
            player_name: name.to_string(),
            player_id: None,
        }
    }

    async fn repo() -> LogRecordRepository {
        LogRecordRepository::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn duplicate_player_join_stores_one_row() {
        let repo = repo().await;
        let event = join("Alice", "2024-03-15T10:00:00");

        assert_eq!(repo.insert_player_joins(vec![event.clone()]).await.unwrap(), 1);
        assert_eq!(repo.insert_player_joins(vec![event]).await.unwrap(), 0);
        assert_eq!(repo.counts().await.unwrap().player_joins, 1);
    }

    #[tokio::test]
    async fn checkpoints_track_per_category_maxima() {
        let repo = repo().await;
        assert!(repo.checkpoints().await.unwrap().latest().is_none());

        repo.insert_player_joins(vec![
            join("Alice", "2024-03-15T10:00:00"),
            join("Bob", "2024-03-16T10:00:00"),
        ])
        .await
        .unwrap();

        let checkpoints = repo.checkpoints().await.unwrap();
        assert_eq!(checkpoints.player_join, Some(ts("2024-03-16T10:00:00")));
        assert_eq!(checkpoints.world_join, None);
        assert_eq!(checkpoints.latest(), Some(ts("2024-03-16T10:00:00")));
    }

    #[tokio::test]
    async fn events_between_filters_and_sorts() {
        let repo = repo().await;
        repo.insert_player_joins(vec![
            join("Late", "2024-05-01T10:00:00"),
            join("Early", "2024-03-01T10:00:00"),
        ])
        .await
        .unwrap();
        repo.insert_world_joins(vec![WorldJoinEvent {
            joined_at: ts("2024-04-01T10:00:00"),
            world_id: WorldId::parse("wrld_abc").unwrap(),
            instance_id: "1".to_string(),
            world_name: "W".to_string(),
        }])
        .await
        .unwrap();

        let all = repo.records(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));

        let bounded = repo
            .records(Some(ts("2024-03-15T00:00:00")), Some(ts("2024-04-15T00:00:00")))
            .await
            .unwrap();
        assert_eq!(bounded.len(), 1);
        assert!(matches!(bounded[0], LogEvent::WorldJoin(_)));
    }

    #[tokio::test]
    async fn replace_all_swaps_table_contents() {
        let repo = repo().await;
        repo.insert_player_joins(vec![join("Alice", "2024-03-15T10:00:00")])
            .await
            .unwrap();

        let rebuilt = repo
            .replace_all(vec![LogEvent::WorldJoin(WorldJoinEvent {
                joined_at: "2024-04-01T10:00:00".parse().unwrap(),
                world_id: WorldId::parse("wrld_abc").unwrap(),
                instance_id: "1".to_string(),
                world_name: "W".to_string(),
            })])
            .await
            .unwrap();
        assert_eq!(rebuilt.world_joins, 1);

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.world_joins, 1);
        assert_eq!(counts.player_joins, 0);
    }

    #[tokio::test]
    async fn replace_all_with_no_events_empties_every_table() {
        let repo = repo().await;
        repo.insert_player_joins(vec![join("Alice", "2024-03-15T10:00:00")])
            .await
            .unwrap();
        let rebuilt = repo.replace_all(Vec::new()).await.unwrap();
        assert_eq!(rebuilt.total(), 0);
        assert_eq!(repo.counts().await.unwrap().total(), 0);
    }
}
