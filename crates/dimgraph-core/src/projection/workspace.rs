//! Workspace registry.
//!
//! Maps each workspace to its current content stream and tracks whether it
//! has fallen behind its base. A workspace becomes outdated when content
//! events land on its base's current stream, or when the base itself is
//! published to, rebased or discarded.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::event::EventData;
use crate::model::{ContentStreamId, WorkspaceName, WorkspaceStatus};
use crate::store::EventEnvelope;

use super::{ProjectionError, ProjectionHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRecord {
    pub name: WorkspaceName,
    pub base: Option<WorkspaceName>,
    pub content_stream_id: ContentStreamId,
    pub status: WorkspaceStatus,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const SELECT: &str =
    "SELECT workspace_name, base_workspace_name, current_content_stream_id, status FROM workspaces";

fn read_raw(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode(
    raw: (String, Option<String>, String, String),
) -> Result<WorkspaceRecord, ProjectionError> {
    let (name, base, content_stream_id, status) = raw;
    Ok(WorkspaceRecord {
        name: WorkspaceName::new_unchecked(name),
        base: base.map(WorkspaceName::new_unchecked),
        content_stream_id: ContentStreamId::new_unchecked(content_stream_id),
        status: WorkspaceStatus::parse(&status)
            .ok_or_else(|| {
                ProjectionError::Corrupt(format!("unknown workspace status '{status}'"))
            })?,
    })
}

/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a bad row.
pub fn find(
    conn: &Connection,
    name: &WorkspaceName,
) -> Result<Option<WorkspaceRecord>, ProjectionError> {
    conn.query_row(
        &format!("{SELECT} WHERE workspace_name = ?1"),
        params![name.as_str()],
        read_raw,
    )
    .optional()?
    .map(decode)
    .transpose()
}

/// Every workspace, ordered by name.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a bad row.
pub fn all(conn: &Connection) -> Result<Vec<WorkspaceRecord>, ProjectionError> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY workspace_name"))?;
    let rows = stmt.query_map([], read_raw)?;
    rows.map(|raw| decode(raw?)).collect()
}

/// Workspaces whose base is `name`.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a bad row.
pub fn dependents(
    conn: &Connection,
    name: &WorkspaceName,
) -> Result<Vec<WorkspaceRecord>, ProjectionError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE base_workspace_name = ?1 ORDER BY workspace_name"
    ))?;
    let rows = stmt.query_map(params![name.as_str()], read_raw)?;
    rows.map(|raw| decode(raw?)).collect()
}

/// Whether any workspace currently points at `id`.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn is_content_stream_in_use(
    conn: &Connection,
    id: &ContentStreamId,
) -> Result<bool, ProjectionError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM workspaces WHERE current_content_stream_id = ?1)",
        params![id.as_str()],
        |row| row.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorkspaceProjection;

impl WorkspaceProjection {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn insert(
    tx: &Connection,
    name: &WorkspaceName,
    base: Option<&WorkspaceName>,
    content_stream_id: &ContentStreamId,
) -> Result<(), ProjectionError> {
    tx.execute(
        "INSERT INTO workspaces \
         (workspace_name, base_workspace_name, current_content_stream_id, status) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            name.as_str(),
            base.map(WorkspaceName::as_str),
            content_stream_id.as_str(),
            WorkspaceStatus::UpToDate.as_str(),
        ],
    )?;
    Ok(())
}

/// Point `name` at a fresh stream forked from its base's tip.
fn rebind(
    tx: &Connection,
    name: &WorkspaceName,
    content_stream_id: &ContentStreamId,
) -> Result<(), ProjectionError> {
    tx.execute(
        "UPDATE workspaces SET current_content_stream_id = ?2, status = ?3 \
         WHERE workspace_name = ?1",
        params![name.as_str(), content_stream_id.as_str(), WorkspaceStatus::UpToDate.as_str()],
    )?;
    Ok(())
}

fn mark_dependents_outdated(tx: &Connection, name: &WorkspaceName) -> Result<(), ProjectionError> {
    tx.execute(
        "UPDATE workspaces SET status = ?2 WHERE base_workspace_name = ?1",
        params![name.as_str(), WorkspaceStatus::Outdated.as_str()],
    )?;
    Ok(())
}

impl ProjectionHandler for WorkspaceProjection {
    fn handle(
        &mut self,
        tx: &Connection,
        event: &EventData,
        _envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        match event {
            EventData::RootWorkspaceWasCreated(e) => {
                insert(tx, &e.workspace_name, None, &e.new_content_stream_id)?;
            }
            EventData::WorkspaceWasCreated(e) => {
                insert(
                    tx,
                    &e.workspace_name,
                    Some(&e.base_workspace_name),
                    &e.new_content_stream_id,
                )?;
            }
            EventData::WorkspaceWasPublished(e) => {
                mark_dependents_outdated(tx, &e.target_workspace_name)?;
                rebind(tx, &e.source_workspace_name, &e.new_source_content_stream_id)?;
            }
            EventData::WorkspaceWasPartiallyPublished(e) => {
                mark_dependents_outdated(tx, &e.target_workspace_name)?;
                rebind(tx, &e.source_workspace_name, &e.new_source_content_stream_id)?;
            }
            EventData::WorkspaceWasDiscarded(e) => {
                rebind(tx, &e.workspace_name, &e.new_content_stream_id)?;
                mark_dependents_outdated(tx, &e.workspace_name)?;
            }
            EventData::WorkspaceWasPartiallyDiscarded(e) => {
                rebind(tx, &e.workspace_name, &e.new_content_stream_id)?;
                mark_dependents_outdated(tx, &e.workspace_name)?;
            }
            EventData::WorkspaceWasRebased(e) => {
                rebind(tx, &e.workspace_name, &e.new_content_stream_id)?;
                mark_dependents_outdated(tx, &e.workspace_name)?;
            }
            EventData::WorkspaceWasRemoved(e) => {
                tx.execute(
                    "DELETE FROM workspaces WHERE workspace_name = ?1",
                    params![e.workspace_name.as_str()],
                )?;
            }
            event if event.is_node_event() => {
                if let Some(id) = event.content_stream_id() {
                    tx.execute(
                        "UPDATE workspaces SET status = ?2 WHERE base_workspace_name IN \
                         (SELECT workspace_name FROM workspaces \
                          WHERE current_content_stream_id = ?1)",
                        params![id.as_str(), WorkspaceStatus::Outdated.as_str()],
                    )?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn reset(&mut self, tx: &Connection) -> Result<(), ProjectionError> {
        tx.execute("DELETE FROM workspaces", [])?;
        Ok(())
    }
}
