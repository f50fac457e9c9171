//! Database handle
//!
//! Owns the SQLite connection and funnels every touch through the
//! [`DbQueue`]. Actual SQL runs on the blocking pool; the queue's
//! default concurrency of 1 keeps the single-writer store safe and
//! preserves read/write ordering.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value;
use tracing::info;

use crate::error::DbError;
use crate::queue::{DbQueue, DbQueueConfig};

/// Schema for the derived event tables. The unique keys make duplicate
/// inserts no-ops, which is what keeps sync idempotent.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS world_join_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    world_id TEXT NOT NULL,
    world_instance_id TEXT NOT NULL,
    world_name TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    UNIQUE (world_instance_id, joined_at)
);
CREATE TABLE IF NOT EXISTS player_join_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_name TEXT NOT NULL,
    player_id TEXT,
    joined_at TEXT NOT NULL,
    UNIQUE (player_name, joined_at)
);
CREATE TABLE IF NOT EXISTS player_leave_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_name TEXT NOT NULL,
    player_id TEXT,
    left_at TEXT NOT NULL,
    UNIQUE (player_name, left_at)
);
";

/// Queue-fronted SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    queue: DbQueue,
}

impl Database {
    /// Open (or create) a database file with the default queue
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with_queue(path, DbQueueConfig::default()).await
    }

    /// Open (or create) a database file with a custom queue config
    pub async fn open_with_queue(
        path: impl AsRef<Path>,
        config: DbQueueConfig,
    ) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, DbError> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| DbError::Background(e.to_string()))??;

        info!("Opened database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: DbQueue::new(config),
        })
    }

    /// In-memory database for tests
    pub async fn open_in_memory() -> Result<Self, DbError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, DbError> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| DbError::Background(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: DbQueue::new(DbQueueConfig::default()),
        })
    }

    /// The queue in front of this database
    pub fn queue(&self) -> &DbQueue {
        &self.queue
    }

    /// Run a closure against the connection, through the queue
    pub async fn call<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        self.queue
            .add(move || async move {
                tokio::task::spawn_blocking(move || {
                    let mut conn = conn.lock().expect("connection lock");
                    f(&mut conn).map_err(DbError::from)
                })
                .await
                .map_err(|e| DbError::Background(e.to_string()))?
            })
            .await
    }

    /// Run a closure under a transaction, through the queue.
    ///
    /// Any error inside rolls the transaction back and surfaces as
    /// [`DbError::Transaction`].
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        self.queue
            .add(move || async move {
                tokio::task::spawn_blocking(move || {
                    let mut conn = conn.lock().expect("connection lock");
                    let tx = conn.transaction()?;
                    match f(&tx) {
                        Ok(value) => {
                            tx.commit()?;
                            Ok(value)
                        }
                        // Dropping the transaction rolls it back.
                        Err(source) => Err(DbError::Transaction { source }),
                    }
                })
                .await
                .map_err(|e| DbError::Background(e.to_string()))?
            })
            .await
    }

    /// Read path: run a SQL statement through the same queue so reads
    /// keep their ordering relative to writes. Rows come back as JSON
    /// objects keyed by column name.
    pub async fn query_rows(
        &self,
        sql: impl Into<String>,
    ) -> Result<Vec<serde_json::Map<String, Value>>, DbError> {
        let sql = sql.into();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = serde_json::Map::new();
                for (i, name) in columns.iter().enumerate() {
                    let value = match row.get_ref(i)? {
                        ValueRef::Null => Value::Null,
                        ValueRef::Integer(v) => Value::from(v),
                        ValueRef::Real(v) => Value::from(v),
                        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
                    };
                    object.insert(name.clone(), value);
                }
                out.push(object);
            }
            Ok(out)
        })
        .await
    }

    /// Drain the queue and release the handle
    pub async fn close(self) {
        self.queue.on_idle().await;
    }
}
