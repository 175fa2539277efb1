//! SQLite-backed topic log
//!
//! Tables:
//! - `log_records`        append-only messages, ordered by `seq` within a topic
//! - `consumer_positions` committed read position per (group, topic)

use super::{LogConsumer, LogProducer, LogRecord, StartPosition, TransportError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS log_records (
        topic TEXT NOT NULL,
        seq INTEGER NOT NULL,
        record_key TEXT,
        payload BLOB NOT NULL,
        appended_at_ms INTEGER NOT NULL,
        PRIMARY KEY (topic, seq)
    );
    CREATE TABLE IF NOT EXISTS consumer_positions (
        group_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        next_seq INTEGER NOT NULL,
        PRIMARY KEY (group_id, topic)
    );
";

/// Durable topic log stored in one SQLite file
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventLog {
    /// Open (or create) the log at `db_path` and make sure the schema exists
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, TransportError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TransportError::Database(format!(
                        "Failed to create log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        log::info!("📊 Topic log ready (WAL mode)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, TransportError> {
        let mut guard = self.conn.lock().map_err(|_| TransportError::Closed)?;
        Ok(f(&mut *guard)?)
    }

    /// Sequence number the next message on `topic` will get
    pub fn end_position(&self, topic: &str) -> Result<u64, TransportError> {
        self.with_conn(|conn| next_seq(conn, topic))
    }

    /// Committed position for a group, if it has ever committed
    pub fn committed_position(&self, group_id: &str, topic: &str) -> Result<Option<u64>, TransportError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT next_seq FROM consumer_positions WHERE group_id = ?1 AND topic = ?2",
                params![group_id, topic],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|seq| seq.map(|s| s as u64))
        })
    }

    /// Create a consumer for `topic` in `group_id`
    ///
    /// A group without a committed position starts at `start`, and that
    /// position is committed right away so restarts resume from it.
    pub fn consumer(
        &self,
        group_id: &str,
        topic: &str,
        start: StartPosition,
    ) -> Result<SqliteLogConsumer, TransportError> {
        let position = match self.committed_position(group_id, topic)? {
            Some(seq) => seq,
            None => {
                let seq = match start {
                    StartPosition::Earliest => 0,
                    StartPosition::Latest => self.end_position(topic)?,
                };
                self.with_conn(|conn| store_position(conn, group_id, topic, seq))?;
                seq
            }
        };

        log::info!(
            "📖 Consumer '{}' on '{}' starting at seq {}",
            group_id,
            topic,
            position
        );

        Ok(SqliteLogConsumer {
            log: self.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            position,
            committed: position,
        })
    }
}

fn next_seq(conn: &Connection, topic: &str) -> Result<u64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(MAX(seq) + 1, 0) FROM log_records WHERE topic = ?1",
        params![topic],
        |row| row.get::<_, i64>(0),
    )
    .map(|seq| seq as u64)
}

fn store_position(conn: &Connection, group_id: &str, topic: &str, seq: u64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO consumer_positions (group_id, topic, next_seq) VALUES (?1, ?2, ?3)
         ON CONFLICT(group_id, topic) DO UPDATE SET next_seq = excluded.next_seq",
        params![group_id, topic, seq as i64],
    )?;
    Ok(())
}

#[async_trait]
impl LogProducer for SqliteEventLog {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<u64, TransportError> {
        let appended_at_ms = chrono::Utc::now().timestamp_millis();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let seq = next_seq(&tx, topic)?;
            tx.execute(
                "INSERT INTO log_records (topic, seq, record_key, payload, appended_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![topic, seq as i64, key, payload, appended_at_ms],
            )?;
            tx.commit()?;
            Ok(seq)
        })
    }
}

pub struct SqliteLogConsumer {
    log: SqliteEventLog,
    group_id: String,
    topic: String,
    position: u64,
    committed: u64,
}

#[async_trait]
impl LogConsumer for SqliteLogConsumer {
    async fn poll(&mut self, max: usize) -> Result<Vec<LogRecord>, TransportError> {
        let topic = self.topic.clone();
        let from = self.position;

        let records = self.log.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT seq, record_key, payload FROM log_records
                 WHERE topic = ?1 AND seq >= ?2 ORDER BY seq LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![topic, from as i64, max as i64], |row| {
                Ok(LogRecord {
                    topic: topic.clone(),
                    seq: row.get::<_, i64>(0)? as u64,
                    key: row.get(1)?,
                    payload: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        if let Some(last) = records.last() {
            self.position = last.seq + 1;
        }
        Ok(records)
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        if self.position == self.committed {
            return Ok(());
        }

        let seq = self.position;
        self.log
            .with_conn(|conn| store_position(conn, &self.group_id, &self.topic, seq))?;
        self.committed = seq;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}
