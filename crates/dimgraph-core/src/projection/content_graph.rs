//! Materialized graphs, one serialized arena per content stream.
//!
//! Graphs touched by a batch are loaded once, updated in memory and written
//! back in `end_batch`. A fork copies the source's arena as it stands when
//! the fork event is handled, which is the source at the forked version
//! because the log is read in order.
//!
//! Each row also records the version of the content stream's own stream the
//! graph has seen. Commands validated against the graph append with that
//! version as their expected version.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, params};

use crate::event::EventData;
use crate::graph::ContentGraph;
use crate::model::ContentStreamId;
use crate::store::{EventEnvelope, StreamName, Version};

use super::{ProjectionError, ProjectionHandler, to_i64, to_u64};

/// The stored graph of `id`; empty if the stream has none.
///
/// # Errors
///
/// Returns the SQLite error or the JSON error of a corrupt row.
pub fn load(conn: &Connection, id: &ContentStreamId) -> Result<ContentGraph, ProjectionError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT graph_json FROM content_graphs WHERE content_stream_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(ContentGraph::from_json(&json)?),
        None => Ok(ContentGraph::new()),
    }
}

/// The version of `id`'s stream the stored graph reflects; `None` if the
/// graph has not been projected yet.
///
/// # Errors
///
/// Returns the SQLite error or a corrupt version.
pub fn load_version(
    conn: &Connection,
    id: &ContentStreamId,
) -> Result<Option<Version>, ProjectionError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM content_graphs WHERE content_stream_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    version.map(|v| to_u64(v).map(Version::new)).transpose()
}

/// Raw stored JSON per stream, ordered by id. Used to compare replays.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn dump(conn: &Connection) -> Result<Vec<(String, String)>, ProjectionError> {
    let mut stmt =
        conn.prepare(
            "SELECT content_stream_id, graph_json FROM content_graphs ORDER BY content_stream_id",
        )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

#[derive(Debug, Default)]
pub struct ContentGraphProjection {
    /// Graphs changed in the current batch; `None` marks a deletion.
    dirty: BTreeMap<ContentStreamId, Option<ContentGraph>>,
    /// Latest version seen on each content stream's own stream in this batch.
    seen: BTreeMap<ContentStreamId, Version>,
}

impl ContentGraphProjection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn graph_mut(
        &mut self,
        tx: &Connection,
        id: &ContentStreamId,
    ) -> Result<&mut ContentGraph, ProjectionError> {
        if !matches!(self.dirty.get(id), Some(Some(_))) {
            let graph = load(tx, id)?;
            self.dirty.insert(id.clone(), Some(graph));
        }
        self.dirty
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| ProjectionError::Corrupt(format!("graph of {id} vanished")))
    }

    fn snapshot(
        &self,
        tx: &Connection,
        id: &ContentStreamId,
    ) -> Result<ContentGraph, ProjectionError> {
        match self.dirty.get(id) {
            Some(Some(graph)) => Ok(graph.clone()),
            Some(None) => Ok(ContentGraph::new()),
            None => load(tx, id),
        }
    }
}

impl ProjectionHandler for ContentGraphProjection {
    fn start_batch(&mut self, _tx: &Connection) -> Result<(), ProjectionError> {
        self.dirty.clear();
        self.seen.clear();
        Ok(())
    }

    fn handle(
        &mut self,
        tx: &Connection,
        event: &EventData,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        // Publishing copies node events onto the base stream; those count for
        // the base, which is the stream they are stored in.
        if let Some(id) = event
            .content_stream_id()
            .filter(|id| envelope.stream == StreamName::for_content_stream(id))
        {
            self.seen.insert(id.clone(), envelope.version);
        }

        match event {
            EventData::ContentStreamWasCreated(e) => {
                self.dirty.insert(e.content_stream_id.clone(), Some(ContentGraph::new()));
            }
            EventData::ContentStreamWasForked(e) => {
                let copy = self.snapshot(tx, &e.source_content_stream_id)?;
                self.dirty.insert(e.new_content_stream_id.clone(), Some(copy));
            }
            EventData::ContentStreamWasRemoved(e) => {
                self.dirty.insert(e.content_stream_id.clone(), None);
            }
            event if event.is_node_event() => {
                let Some(id) = event.content_stream_id() else {
                    return Ok(());
                };
                self.graph_mut(tx, id)?.apply(event)?;
                tracing::debug!(
                    content_stream_id = %id,
                    sequence_number = envelope.sequence_number.value(),
                    event_type = %event.event_type(),
                    "applied event to content graph"
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn end_batch(&mut self, tx: &Connection) -> Result<(), ProjectionError> {
        let mut seen = std::mem::take(&mut self.seen);
        for (id, graph) in std::mem::take(&mut self.dirty) {
            let version = seen.remove(&id).map(|v| to_i64(v.value())).transpose()?;
            match graph {
                Some(graph) => {
                    tx.execute(
                        "INSERT INTO content_graphs (content_stream_id, graph_json, version) \
                         VALUES (?1, ?2, COALESCE(?3, 0)) \
                         ON CONFLICT(content_stream_id) DO UPDATE SET \
                         graph_json = excluded.graph_json, \
                         version = COALESCE(?3, content_graphs.version)",
                        params![id.as_str(), graph.to_json()?, version],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM content_graphs WHERE content_stream_id = ?1",
                        params![id.as_str()],
                    )?;
                }
            }
        }
        // Closing and reopening leave the graph alone but still move the stream.
        for (id, version) in seen {
            tx.execute(
                "UPDATE content_graphs SET version = ?2 WHERE content_stream_id = ?1",
                params![id.as_str(), to_i64(version.value())?],
            )?;
        }
        Ok(())
    }

    fn abort_batch(&mut self) {
        self.dirty.clear();
        self.seen.clear();
    }

    fn reset(&mut self, tx: &Connection) -> Result<(), ProjectionError> {
        self.dirty.clear();
        self.seen.clear();
        tx.execute("DELETE FROM content_graphs", [])?;
        Ok(())
    }
}
