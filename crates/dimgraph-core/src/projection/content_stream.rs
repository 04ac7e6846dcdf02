//! Content stream registry.
//!
//! One row per stream: its lifecycle state, the version of its last event,
//! the stream and version it was forked from, and whether it was removed.
//! Removed streams keep their row so their ids are never reused.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::event::EventData;
use crate::model::{ContentStreamId, ContentStreamState};
use crate::store::{EventEnvelope, StreamName, Version};

use super::{ProjectionError, ProjectionHandler, to_i64, to_u64};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentStreamRecord {
    pub id: ContentStreamId,
    /// Version of the last event in the stream.
    pub version: Version,
    /// Stream and version this one was forked from.
    pub source: Option<(ContentStreamId, Version)>,
    pub state: ContentStreamState,
    /// Recorded on close so a reopen can be checked against it.
    pub state_before_close: Option<ContentStreamState>,
    pub removed: bool,
}

impl ContentStreamRecord {
    #[must_use]
    pub const fn new(id: ContentStreamId, version: Version) -> Self {
        Self {
            id,
            version,
            source: None,
            state: ContentStreamState::New,
            state_before_close: None,
            removed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const SELECT: &str = "SELECT content_stream_id, version, source_content_stream_id, source_version, \
     state, state_before_close, removed FROM content_streams";

fn parse_state(raw: &str) -> Result<ContentStreamState, ProjectionError> {
    ContentStreamState::parse(raw)
        .ok_or_else(|| ProjectionError::Corrupt(format!("unknown content stream state '{raw}'")))
}

type RawRecord = (String, i64, Option<String>, Option<i64>, String, Option<String>, bool);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
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

fn decode(raw: RawRecord) -> Result<ContentStreamRecord, ProjectionError> {
    let (id, version, source_id, source_version, state, state_before_close, removed) = raw;
    let source = match (source_id, source_version) {
        (Some(id), Some(version)) => Some((
            ContentStreamId::new_unchecked(id),
            Version::new(to_u64(version)?),
        )),
        _ => None,
    };
    Ok(ContentStreamRecord {
        id: ContentStreamId::new_unchecked(id),
        version: Version::new(to_u64(version)?),
        source,
        state: parse_state(&state)?,
        state_before_close: state_before_close.as_deref().map(parse_state).transpose()?,
        removed,
    })
}

/// The registry entry of `id`, removed streams included.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a bad row.
pub fn find(
    conn: &Connection,
    id: &ContentStreamId,
) -> Result<Option<ContentStreamRecord>, ProjectionError> {
    conn.query_row(
        &format!("{SELECT} WHERE content_stream_id = ?1"),
        params![id.as_str()],
        read_raw,
    )
    .optional()?
    .map(decode)
    .transpose()
}

/// Every registry entry, ordered by id.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a bad row.
pub fn all(conn: &Connection) -> Result<Vec<ContentStreamRecord>, ProjectionError> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY content_stream_id"))?;
    let rows = stmt.query_map([], read_raw)?;
    rows.map(|raw| decode(raw?)).collect()
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ContentStreamProjection;

impl ContentStreamProjection {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn set_state(
    tx: &Connection,
    id: &ContentStreamId,
    version: Version,
    state: ContentStreamState,
    state_before_close: Option<ContentStreamState>,
) -> Result<(), ProjectionError> {
    tx.execute(
        "UPDATE content_streams SET version = ?2, state = ?3, state_before_close = ?4 \
         WHERE content_stream_id = ?1",
        params![
            id.as_str(),
            to_i64(version.value())?,
            state.as_str(),
            state_before_close.map(ContentStreamState::as_str),
        ],
    )?;
    Ok(())
}

impl ProjectionHandler for ContentStreamProjection {
    fn handle(
        &mut self,
        tx: &Connection,
        event: &EventData,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        let Some(id) = event.content_stream_id() else {
            return Ok(());
        };
        // Only events in the stream's own log move its version.
        if envelope.stream != StreamName::for_content_stream(id) {
            return Ok(());
        }
        let version = envelope.version;
        match event {
            EventData::ContentStreamWasCreated(_) => {
                tx.execute(
                    "INSERT INTO content_streams (content_stream_id, version, state) \
                     VALUES (?1, ?2, ?3)",
                    params![
                        id.as_str(),
                        to_i64(version.value())?,
                        ContentStreamState::New.as_str()
                    ],
                )?;
            }
            EventData::ContentStreamWasForked(e) => {
                tx.execute(
                    "INSERT INTO content_streams \
                     (content_stream_id, version, source_content_stream_id, source_version, state) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id.as_str(),
                        to_i64(version.value())?,
                        e.source_content_stream_id.as_str(),
                        to_i64(e.version_of_source_content_stream.value())?,
                        ContentStreamState::New.as_str(),
                    ],
                )?;
            }
            EventData::ContentStreamWasClosed(_) => {
                let current = require(tx, id)?;
                set_state(tx, id, version, ContentStreamState::Closed, Some(current.state))?;
            }
            EventData::ContentStreamWasReopened(e) => {
                let current = require(tx, id)?;
                let state = current.state_before_close.unwrap_or(e.previous_state);
                set_state(tx, id, version, state, None)?;
            }
            EventData::ContentStreamWasRemoved(_) => {
                tx.execute(
                    "UPDATE content_streams SET version = ?2, removed = 1 \
                     WHERE content_stream_id = ?1",
                    params![id.as_str(), to_i64(version.value())?],
                )?;
            }
            _ => {
                let current = require(tx, id)?;
                let state = match current.state {
                    ContentStreamState::New => ContentStreamState::Open,
                    other => other,
                };
                set_state(tx, id, version, state, current.state_before_close)?;
            }
        }
        tracing::debug!(
            content_stream_id = %id,
            version = version.value(),
            event_type = %event.event_type(),
            "content stream registry updated"
        );
        Ok(())
    }

    fn reset(&mut self, tx: &Connection) -> Result<(), ProjectionError> {
        tx.execute("DELETE FROM content_streams", [])?;
        Ok(())
    }
}

fn require(tx: &Connection, id: &ContentStreamId) -> Result<ContentStreamRecord, ProjectionError> {
    find(tx, id)?.ok_or_else(|| {
        ProjectionError::Corrupt(format!("event for unknown content stream {id}"))
    })
}
