//! SQLite-backed event store.
//!
//! The version check and the inserts run in one `BEGIN IMMEDIATE`
//! transaction, so two writers on the same stream serialize on the database
//! write lock. `UNIQUE(stream, version)` backs the check for writers that
//! bypass this type.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use super::{
    CommitResult, EventEnvelope, EventStore, EventStoreError, ExpectedVersion, NewEvent,
    SequenceNumber, StreamName, Version,
};
use crate::db::{self, schema};

#[derive(Debug)]
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) the event log at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the table cannot be
    /// created.
    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        db::ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open event store {}", path.display()))?;
        db::configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
        conn.execute_batch(schema::EVENTS_SQL)
            .context("create events table")?;
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory event log.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the table cannot be created.
    pub fn in_memory() -> Result<Self, EventStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::EVENTS_SQL)?;
        Ok(Self::from_connection(conn))
    }

    const fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EventStoreError> {
        self.conn.lock().map_err(|_| EventStoreError::LockPoisoned)
    }
}

fn current_version(conn: &Connection, stream: &StreamName) -> rusqlite::Result<Option<Version>> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM events WHERE stream = ?1",
            params![stream.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(max.and_then(|v| u64::try_from(v).ok()).map(Version::new))
}

fn to_i64(value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::Corrupt(format!("value {value} out of range")))
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

const SELECT_COLUMNS: &str =
    "SELECT sequence_number, stream, version, event_type, payload, metadata, recorded_at \
     FROM events";

type RawRow = (i64, String, i64, String, String, String, String);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_row(raw: RawRow) -> Result<EventEnvelope, EventStoreError> {
    let (sequence_number, stream, version, event_type, payload, metadata, recorded_at) = raw;
    let out_of_range = |what: &str, value: i64| {
        EventStoreError::Corrupt(format!("negative {what} {value} in event log"))
    };
    Ok(EventEnvelope {
        sequence_number: SequenceNumber::new(
            u64::try_from(sequence_number)
                .map_err(|_| out_of_range("sequence number", sequence_number))?,
        ),
        stream: StreamName::new(stream),
        version: Version::new(
            u64::try_from(version).map_err(|_| out_of_range("version", version))?,
        ),
        event_type,
        payload: serde_json::from_str(&payload)?,
        metadata: serde_json::from_str(&metadata)?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| EventStoreError::Corrupt(format!("bad timestamp '{recorded_at}': {e}")))?
            .with_timezone(&Utc),
    })
}

impl EventStore for SqliteEventStore {
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch(stream.clone()));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_version(&tx, stream)?;
        if !expected.matches(current) {
            tracing::warn!(
                stream = %stream,
                expected = %expected,
                actual = ?current.map(Version::value),
                "append rejected"
            );
            return Err(EventStoreError::ConcurrencyConflict {
                stream: stream.clone(),
                expected,
                actual: current,
            });
        }

        let recorded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut version = current.map_or(Version::new(0), Version::next);
        let mut last = None;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO events (stream, version, event_type, payload, metadata, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for event in &events {
                let inserted = insert.execute(params![
                    stream.as_str(),
                    to_i64(version.value())?,
                    event.event_type,
                    event.payload.to_string(),
                    event.metadata.to_string(),
                    recorded_at,
                ]);
                match inserted {
                    Ok(_) => {}
                    Err(error) if is_unique_violation(&error) => {
                        return Err(EventStoreError::ConcurrencyConflict {
                            stream: stream.clone(),
                            expected,
                            actual: current,
                        });
                    }
                    Err(error) => return Err(error.into()),
                }
                let sequence_number = u64::try_from(tx.last_insert_rowid()).map_err(|_| {
                    EventStoreError::Corrupt("negative sequence number".to_string())
                })?;
                last = Some(CommitResult {
                    version,
                    sequence_number: SequenceNumber::new(sequence_number),
                });
                version = version.next();
            }
        }
        tx.commit()?;

        tracing::debug!(stream = %stream, events = events.len(), "appended events");
        last.ok_or_else(|| EventStoreError::EmptyBatch(stream.clone()))
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("{SELECT_COLUMNS} WHERE stream = ?1 ORDER BY version"))?;
        let rows = stmt
            .query_map(params![stream.as_str()], read_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_row).collect()
    }

    fn load_from(
        &self,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE sequence_number > ?1 ORDER BY sequence_number LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![to_i64(after.value())?, limit], read_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_row).collect()
    }

    fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>, EventStoreError> {
        let conn = self.conn()?;
        Ok(current_version(&conn, stream)?)
    }

    fn head(&self) -> Result<SequenceNumber, EventStoreError> {
        let conn = self.conn()?;
        let max: Option<i64> =
            conn.query_row("SELECT MAX(sequence_number) FROM events", [], |row| row.get(0))?;
        Ok(SequenceNumber::new(
            max.and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DEFAULT_BUSY_TIMEOUT;
    use std::sync::Arc;

    fn event(n: u64) -> NewEvent {
        NewEvent {
            event_type: "Test".to_string(),
            payload: serde_json::json!({ "n": n }),
            metadata: serde_json::json!({"commandType": "Noop"}),
        }
    }

    #[test]
    fn append_and_reload_round_trips_payload_and_metadata() {
        let store = SqliteEventStore::in_memory().expect("store");
        let stream = StreamName::new("ContentStream:cs");
        store
            .append(&stream, vec![event(1), event(2)], ExpectedVersion::NoStream)
            .expect("append");

        let loaded = store.load_stream(&stream).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].version, Version::new(0));
        assert_eq!(loaded[1].payload["n"], 2);
        assert_eq!(loaded[1].metadata["commandType"], "Noop");
        assert_eq!(loaded[1].sequence_number, SequenceNumber::new(2));
    }

    #[test]
    fn exact_version_conflict_does_not_write() {
        let store = SqliteEventStore::in_memory().expect("store");
        let stream = StreamName::new("s");
        store
            .append(&stream, vec![event(1), event(2)], ExpectedVersion::Any)
            .expect("append");
        let err = store
            .append(&stream, vec![event(3)], ExpectedVersion::Exact(Version::new(0)))
            .expect_err("stale");
        match err {
            EventStoreError::ConcurrencyConflict { actual, .. } => {
                assert_eq!(actual, Some(Version::new(1)));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(store.head().expect("head"), SequenceNumber::new(2));
    }

    #[test]
    fn file_store_serializes_concurrent_writers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sqlite3");
        let store = Arc::new(SqliteEventStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open"));
        let stream = StreamName::new("s");
        store
            .append(&stream, vec![event(0)], ExpectedVersion::NoStream)
            .expect("seed");

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                let stream = stream.clone();
                std::thread::spawn(move || {
                    store.append(&stream, vec![event(n)], ExpectedVersion::Exact(Version::new(0)))
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(store.stream_version(&stream).expect("version"), Some(Version::new(1)));
    }

    #[test]
    fn reopening_the_file_keeps_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sqlite3");
        {
            let store = SqliteEventStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open");
            store
                .append(&StreamName::new("s"), vec![event(1)], ExpectedVersion::Any)
                .expect("append");
        }
        let store = SqliteEventStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("reopen");
        assert_eq!(store.head().expect("head"), SequenceNumber::new(1));
    }
}
