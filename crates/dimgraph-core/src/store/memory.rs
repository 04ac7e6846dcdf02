//! In-memory event store for tests and throwaway repositories.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::{
    CommitResult, EventEnvelope, EventStore, EventStoreError, ExpectedVersion, NewEvent,
    SequenceNumber, StreamName, Version,
};

#[derive(Debug, Default)]
struct Inner {
    /// All events in sequence order; index `i` holds sequence number `i + 1`.
    events: Vec<EventEnvelope>,
    /// Indexes into `events`, per stream, in version order.
    streams: HashMap<StreamName, Vec<usize>>,
}

/// Event store held entirely in memory; the version check runs under a mutex.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, EventStoreError> {
        self.inner.lock().map_err(|_| EventStoreError::LockPoisoned)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch(stream.clone()));
        }
        let mut inner = self.lock()?;
        let current = inner
            .streams
            .get(stream)
            .and_then(|indexes| indexes.len().checked_sub(1))
            .map(|last| Version::new(last as u64));
        if !expected.matches(current) {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: stream.clone(),
                expected,
                actual: current,
            });
        }

        let recorded_at = Utc::now();
        let mut version = current.map_or(Version::new(0), Version::next);
        let mut last = None;
        for event in events {
            let index = inner.events.len();
            let envelope = EventEnvelope {
                sequence_number: SequenceNumber::new(index as u64 + 1),
                stream: stream.clone(),
                version,
                event_type: event.event_type,
                payload: event.payload,
                metadata: event.metadata,
                recorded_at,
            };
            last = Some(CommitResult {
                version,
                sequence_number: envelope.sequence_number,
            });
            inner.events.push(envelope);
            inner.streams.entry(stream.clone()).or_default().push(index);
            version = version.next();
        }
        last.ok_or_else(|| EventStoreError::EmptyBatch(stream.clone()))
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let inner = self.lock()?;
        Ok(inner
            .streams
            .get(stream)
            .map(|indexes| indexes.iter().map(|i| inner.events[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn load_from(
        &self,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let inner = self.lock()?;
        let start = usize::try_from(after.value()).unwrap_or(usize::MAX);
        Ok(inner
            .events
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>, EventStoreError> {
        let inner = self.lock()?;
        Ok(inner
            .streams
            .get(stream)
            .and_then(|indexes| indexes.len().checked_sub(1))
            .map(|last| Version::new(last as u64)))
    }

    fn head(&self) -> Result<SequenceNumber, EventStoreError> {
        let inner = self.lock()?;
        Ok(SequenceNumber::new(inner.events.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> NewEvent {
        NewEvent {
            event_type: "Test".to_string(),
            payload: serde_json::json!({ "n": n }),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn versions_start_at_zero_and_sequence_at_one() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("a");
        let result = store
            .append(&stream, vec![event(1), event(2)], ExpectedVersion::NoStream)
            .expect("append");
        assert_eq!(result.version, Version::new(1));
        assert_eq!(result.sequence_number, SequenceNumber::new(2));
        assert_eq!(store.stream_version(&stream).expect("version"), Some(Version::new(1)));
        assert_eq!(store.head().expect("head"), SequenceNumber::new(2));
    }

    #[test]
    fn stale_expected_version_leaves_stream_untouched() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("a");
        store
            .append(&stream, vec![event(1)], ExpectedVersion::NoStream)
            .expect("append");
        let err = store
            .append(&stream, vec![event(2)], ExpectedVersion::NoStream)
            .expect_err("conflict");
        assert!(err.is_concurrency_conflict());
        assert_eq!(store.load_stream(&stream).expect("load").len(), 1);
    }

    #[test]
    fn load_from_interleaves_streams_in_sequence_order() {
        let store = InMemoryEventStore::new();
        let a = StreamName::new("a");
        let b = StreamName::new("b");
        store.append(&a, vec![event(1)], ExpectedVersion::Any).expect("a1");
        store.append(&b, vec![event(2)], ExpectedVersion::Any).expect("b1");
        store.append(&a, vec![event(3)], ExpectedVersion::Any).expect("a2");

        let tail = store.load_from(SequenceNumber::new(1), 10).expect("load");
        let seqs: Vec<u64> = tail.iter().map(|e| e.sequence_number.value()).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(tail[1].version, Version::new(1));
        assert_eq!(store.load_from(SequenceNumber::ZERO, 1).expect("limit").len(), 1);
    }

    #[test]
    fn empty_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(&StreamName::new("a"), vec![], ExpectedVersion::Any)
            .expect_err("empty");
        assert!(matches!(err, EventStoreError::EmptyBatch(_)));
    }
}
