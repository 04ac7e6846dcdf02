//! Read models built from the event log.
//!
//! Each projection is a [`ProjectionHandler`] driven by the subscription
//! engine. A handler only ever writes through the connection it is handed,
//! which is inside the engine's `BEGIN IMMEDIATE` transaction for the batch;
//! the engine writes the checkpoint in the same transaction.
//!
//! The shipped projections:
//! - [`content_stream`]: lifecycle state, version and ancestry of streams
//! - [`workspace`]: workspace bindings and up-to-date status
//! - [`content_graph`]: one serialized [`crate::graph::ContentGraph`] per stream

pub mod content_graph;
pub mod content_stream;
pub mod workspace;

pub use content_graph::ContentGraphProjection;
pub use content_stream::{ContentStreamProjection, ContentStreamRecord};
pub use workspace::{WorkspaceProjection, WorkspaceRecord};

use rusqlite::Connection;

use crate::event::{DataParseError, EventData};
use crate::graph::GraphError;
use crate::store::EventEnvelope;

/// Subscription ids of the shipped projections.
pub const CONTENT_STREAM_SUBSCRIPTION: &str = "contentStream";
pub const WORKSPACE_SUBSCRIPTION: &str = "workspace";
pub const CONTENT_GRAPH_SUBSCRIPTION: &str = "contentGraph";

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid projection JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Event(#[from] DataParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("corrupt projection row: {0}")]
    Corrupt(String),
}

/// A consumer of the event log that keeps its state in the projection
/// database.
///
/// `handle` is only called for events this build can decode; unknown event
/// types are skipped by the engine.
pub trait ProjectionHandler: Send {
    /// Called once per batch before the first event.
    ///
    /// # Errors
    ///
    /// A failure aborts the batch.
    fn start_batch(&mut self, _tx: &Connection) -> Result<(), ProjectionError> {
        Ok(())
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// A failure rolls back the batch and puts the subscription in error.
    fn handle(
        &mut self,
        tx: &Connection,
        event: &EventData,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError>;

    /// Called once per batch after the last event, before the commit.
    ///
    /// # Errors
    ///
    /// A failure aborts the batch.
    fn end_batch(&mut self, _tx: &Connection) -> Result<(), ProjectionError> {
        Ok(())
    }

    /// Drop any state buffered since `start_batch`; the transaction has been
    /// rolled back.
    fn abort_batch(&mut self) {}

    /// Remove everything the projection has written.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error.
    fn reset(&mut self, tx: &Connection) -> Result<(), ProjectionError>;
}

pub(crate) fn to_i64(value: u64) -> Result<i64, ProjectionError> {
    i64::try_from(value)
        .map_err(|_| ProjectionError::Corrupt(format!("value {value} out of range")))
}

pub(crate) fn to_u64(value: i64) -> Result<u64, ProjectionError> {
    u64::try_from(value).map_err(|_| ProjectionError::Corrupt(format!("negative value {value}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use rusqlite::Connection;

    use crate::event::EventData;
    use crate::store::{EventEnvelope, SequenceNumber, StreamName, Version};

    use super::ProjectionHandler;

    pub fn conn() -> Connection {
        crate::db::open_projection_in_memory().expect("projection db")
    }

    /// Feed `events` to `handler` as one batch, numbering them from 1.
    pub fn feed(
        conn: &Connection,
        handler: &mut dyn ProjectionHandler,
        events: &[(&str, u64, EventData)],
    ) {
        handler.start_batch(conn).expect("start batch");
        for (i, (stream, version, event)) in events.iter().enumerate() {
            let envelope = EventEnvelope {
                sequence_number: SequenceNumber::new(i as u64 + 1),
                stream: StreamName::new(*stream),
                version: Version::new(*version),
                event_type: event.event_type().as_str().to_string(),
                payload: event.to_json().expect("payload"),
                metadata: serde_json::json!({}),
                recorded_at: Utc::now(),
            };
            handler.handle(conn, event, &envelope).expect("handle");
        }
        handler.end_batch(conn).expect("end batch");
    }
}
