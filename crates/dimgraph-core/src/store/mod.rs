//! Append-only event store.
//!
//! Events live in named streams. Each stream has a 0-based, gap-free version
//! counter; every stored event also gets a global [`SequenceNumber`] that
//! defines the order subscribers read in.
//!
//! Appends are guarded by an [`ExpectedVersion`] compare-and-swap. A rejected
//! append leaves the stream untouched and reports
//! [`EventStoreError::ConcurrencyConflict`].
//!
//! Two implementations ship with the crate:
//! - [`SqliteEventStore`], checked inside `BEGIN IMMEDIATE` and backed by
//!   `UNIQUE(stream, version)`
//! - [`InMemoryEventStore`], checked under a mutex

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ContentStreamId, WorkspaceName};

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Position of an event inside its stream, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global position of an event in the store, starting at 1.
///
/// `SequenceNumber::ZERO` means "before the first event".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `ContentStream:<id>`
    #[must_use]
    pub fn for_content_stream(id: &ContentStreamId) -> Self {
        Self(format!("ContentStream:{id}"))
    }

    /// `Workspace:<name>`
    #[must_use]
    pub fn for_workspace(name: &WorkspaceName) -> Self {
        Self(format!("Workspace:{name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compare-and-swap condition for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    /// The stream must not contain any event yet.
    NoStream,
    StreamExists,
    /// The last event of the stream must be at this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Whether a stream whose last event is at `current` satisfies this
    /// condition (`None` = empty stream).
    #[must_use]
    pub const fn matches(self, current: Option<Version>) -> bool {
        match (self, current) {
            (Self::Any, _) | (Self::NoStream, None) | (Self::StreamExists, Some(_)) => true,
            (Self::Exact(expected), Some(actual)) => expected.0 == actual.0,
            _ => false,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::StreamExists => f.write_str("stream exists"),
            Self::Exact(v) => write!(f, "version {v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub sequence_number: SequenceNumber,
    pub stream: StreamName,
    pub version: Version,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// External representation:
    /// `{type, data, metadata, streamId, streamVersion, timestamp, sequenceNumber}`.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.event_type,
            "data": self.payload,
            "metadata": self.metadata,
            "streamId": self.stream.as_str(),
            "streamVersion": self.version.value(),
            "timestamp": self.recorded_at.to_rfc3339(),
            "sequenceNumber": self.sequence_number.value(),
        })
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    /// Version of the last appended event.
    pub version: Version,
    /// Sequence number of the last appended event.
    pub sequence_number: SequenceNumber,
}

// ---------------------------------------------------------------------------
// Errors and trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error(
        "concurrency conflict on stream {stream}: expected {expected}, actual {}",
        display_version(.actual)
    )]
    ConcurrencyConflict {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: Option<Version>,
    },

    #[error("cannot append an empty batch to stream {0}")]
    EmptyBatch(StreamName),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid stored event JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event store lock poisoned")]
    LockPoisoned,

    #[error("corrupt event store: {0}")]
    Corrupt(String),
}

#[allow(clippy::ref_option)]
fn display_version(version: &Option<Version>) -> String {
    version.map_or_else(|| "no stream".to_string(), |v| format!("version {v}"))
}

impl EventStoreError {
    #[must_use]
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Storage port for the event log.
pub trait EventStore: Send + Sync {
    /// Append `events` to `stream` if `expected` holds, atomically.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::ConcurrencyConflict`] if the condition fails,
    /// [`EventStoreError::EmptyBatch`] for an empty batch, or a storage error.
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult, EventStoreError>;

    /// All events of `stream` in version order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn load_stream(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Up to `limit` events with a sequence number above `after`, in order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn load_from(
        &self,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Version of the last event of `stream`, `None` if it has none.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>, EventStoreError>;

    /// Highest sequence number in the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn head(&self) -> Result<SequenceNumber, EventStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matching() {
        let v3 = Some(Version::new(3));
        assert!(ExpectedVersion::Any.matches(None));
        assert!(ExpectedVersion::NoStream.matches(None));
        assert!(!ExpectedVersion::NoStream.matches(v3));
        assert!(ExpectedVersion::StreamExists.matches(v3));
        assert!(!ExpectedVersion::StreamExists.matches(None));
        assert!(ExpectedVersion::Exact(Version::new(3)).matches(v3));
        assert!(!ExpectedVersion::Exact(Version::new(2)).matches(v3));
        assert!(!ExpectedVersion::Exact(Version::new(0)).matches(None));
    }

    #[test]
    fn stream_names() {
        let cs = ContentStreamId::new_unchecked("cs-1");
        assert_eq!(StreamName::for_content_stream(&cs).as_str(), "ContentStream:cs-1");
        assert_eq!(
            StreamName::for_workspace(&WorkspaceName::live()).as_str(),
            "Workspace:live"
        );
    }

    #[test]
    fn wire_shape() {
        let envelope = EventEnvelope {
            sequence_number: SequenceNumber::new(7),
            stream: StreamName::new("ContentStream:cs"),
            version: Version::new(2),
            event_type: "ContentStreamWasClosed".to_string(),
            payload: serde_json::json!({"contentStreamId": "cs"}),
            metadata: serde_json::json!({}),
            recorded_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .expect("timestamp")
                .with_timezone(&Utc),
        };
        let wire = envelope.to_wire();
        assert_eq!(wire["type"], "ContentStreamWasClosed");
        assert_eq!(wire["data"]["contentStreamId"], "cs");
        assert_eq!(wire["streamId"], "ContentStream:cs");
        assert_eq!(wire["streamVersion"], 2);
        assert_eq!(wire["sequenceNumber"], 7);
        assert!(wire["timestamp"].as_str().is_some_and(|t| t.starts_with("2024-01-02")));
    }

    #[test]
    fn conflict_message_names_both_versions() {
        let err = EventStoreError::ConcurrencyConflict {
            stream: StreamName::new("s"),
            expected: ExpectedVersion::Exact(Version::new(5)),
            actual: Some(Version::new(6)),
        };
        let text = err.to_string();
        assert!(text.contains("expected version 5"));
        assert!(text.contains("actual version 6"));
        assert!(err.is_concurrency_conflict());
    }
}
