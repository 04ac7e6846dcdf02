//! Catch-up driver.
//!
//! One run reads the log in batches of `engine.batch_size`, starting at the
//! lowest position among the subscriptions that want events. Each batch is
//! applied to each subscriber in its own `BEGIN IMMEDIATE` transaction:
//!
//! ```text
//! BEGIN IMMEDIATE
//!   re-read checkpoint          (another process may have moved it)
//!   start_batch / handle* / end_batch
//!   save position + status
//! COMMIT
//! ```
//!
//! A failing subscriber is rolled back, put in ERROR and left out of the rest
//! of the run; the others keep going.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::migrations::{self, MigrationError};
use crate::error::ErrorCode;
use crate::event::{self, EventData};
use crate::lock::{CatchUpLock, LockError};
use crate::projection::{ProjectionError, ProjectionHandler};
use crate::store::{EventEnvelope, EventStore, EventStoreError, SequenceNumber};

use super::store;
use super::{RunMode, Subscription, SubscriptionStatus};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),
}

impl EngineError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::EventStoreFailure,
            Self::Projection(_) | Self::Sqlite(_) | Self::Migration(_) => {
                ErrorCode::CorruptProjection
            }
            Self::Lock(err) => err.code(),
            Self::UnknownSubscription(_) => ErrorCode::InvalidCommand,
        }
    }
}

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one catch-up run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Head of the log when the run started.
    pub head: SequenceNumber,
    pub batches: usize,
    /// Events handed to at least one handler, counted once per subscriber.
    pub events_applied: usize,
    /// Subscriptions that failed during this run.
    pub failed: Vec<String>,
    /// ONCE subscriptions that reached the head and detached.
    pub detached: Vec<String>,
    pub cancelled: bool,
}

struct Subscriber {
    id: String,
    run_mode: RunMode,
    handler: Box<dyn ProjectionHandler>,
}

/// A batch entry: the stored event and its decoded form (`None` for unknown
/// event types, `Err` for a payload that does not parse).
type Decoded = (EventEnvelope, Result<Option<EventData>, String>);

pub struct SubscriptionEngine {
    store: Arc<dyn EventStore>,
    conn: Connection,
    subscribers: Vec<Subscriber>,
    config: EngineConfig,
    lock: Option<(PathBuf, Duration)>,
}

impl SubscriptionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, conn: Connection, config: EngineConfig) -> Self {
        Self {
            store,
            conn,
            subscribers: Vec::new(),
            config,
            lock: None,
        }
    }

    /// Serialize catch-up runs across processes through the lock file at
    /// `path`.
    #[must_use]
    pub fn with_lock(mut self, path: PathBuf, timeout: Duration) -> Self {
        self.lock = Some((path, timeout));
        self
    }

    /// Attach a handler. Call [`Self::setup`] afterwards to create its row.
    pub fn register(&mut self, id: &str, run_mode: RunMode, handler: Box<dyn ProjectionHandler>) {
        self.subscribers.push(Subscriber {
            id: id.to_string(),
            run_mode,
            handler,
        });
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Migrate the projection database and register every subscriber.
    ///
    /// FROM_NOW subscriptions start at the current head. Rows without a
    /// registered handler are detached; detached rows of registered
    /// following subscriptions are re-attached.
    ///
    /// # Errors
    ///
    /// Returns the SQLite or event store error.
    pub fn setup(&mut self) -> Result<(), EngineError> {
        migrations::migrate(&mut self.conn)?;
        let head = self.store.head()?;
        for subscriber in &self.subscribers {
            let start = match subscriber.run_mode {
                RunMode::FromNow => head,
                RunMode::FromBeginning | RunMode::Once => SequenceNumber::ZERO,
            };
            if store::register(&self.conn, &subscriber.id, subscriber.run_mode, start)? {
                debug!(
                    subscription = %subscriber.id,
                    run_mode = %subscriber.run_mode,
                    "registered subscription"
                );
            } else if subscriber.run_mode != RunMode::Once
                && store::find(&self.conn, &subscriber.id)?
                    .is_some_and(|s| s.status == SubscriptionStatus::Detached)
            {
                store::set_status(&self.conn, &subscriber.id, SubscriptionStatus::Active)?;
                info!(subscription = %subscriber.id, "re-attached subscription");
            }
        }
        let ids: Vec<&str> = self.subscribers.iter().map(|s| s.id.as_str()).collect();
        for id in store::detach_unregistered(&self.conn, &ids)? {
            info!(subscription = %id, "detached subscription without handler");
        }
        Ok(())
    }

    /// Current state of every subscription row.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error.
    pub fn status(&self) -> Result<Vec<Subscription>, EngineError> {
        Ok(store::all(&self.conn)?)
    }

    /// Bring every eligible subscription up to the head of the log.
    ///
    /// # Errors
    ///
    /// Returns lock, event store or checkpoint errors. Handler failures are
    /// not errors of the run: they are recorded on the subscription and
    /// listed in [`CatchUpReport::failed`].
    pub fn catch_up(&mut self, cancel: &CancellationToken) -> Result<CatchUpReport, EngineError> {
        let _lock = self
            .lock
            .as_ref()
            .map(|(path, timeout)| CatchUpLock::acquire(path, *timeout))
            .transpose()?;

        let head = self.store.head()?;
        let mut report = CatchUpReport {
            head,
            ..CatchUpReport::default()
        };
        let mut failed: BTreeSet<String> = BTreeSet::new();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(batches = report.batches, "catch-up cancelled");
                break;
            }

            let rows = store::all(&self.conn)?;
            let max_retries = self.config.max_retry_attempts;
            let from = rows
                .iter()
                .filter(|row| !failed.contains(&row.id) && row.wants_events(max_retries))
                .filter(|row| self.subscribers.iter().any(|s| s.id == row.id))
                .map(|row| row.position)
                .min();
            let Some(from) = from else { break };

            let batch = self.store.load_from(from, self.config.batch_size)?;
            let Some(last) = batch.last().map(|e| e.sequence_number) else {
                break;
            };
            let full = batch.len() == self.config.batch_size;
            let decoded: Vec<Decoded> = batch
                .into_iter()
                .map(|envelope| {
                    let data = event::decode(&envelope).map_err(|e| e.to_string());
                    (envelope, data)
                })
                .collect();
            report.batches += 1;
            debug!(from = from.value(), to = last.value(), "catch-up batch");

            for subscriber in &mut self.subscribers {
                if failed.contains(&subscriber.id) {
                    continue;
                }
                match apply_batch(&mut self.conn, subscriber, &decoded, head, max_retries) {
                    Ok(applied) => report.events_applied += applied,
                    Err(BatchFailure::Handler { message, previous }) => {
                        warn!(
                            subscription = %subscriber.id,
                            error = %message,
                            "subscription failed"
                        );
                        store::record_error(&self.conn, &subscriber.id, &message, previous)?;
                        failed.insert(subscriber.id.clone());
                    }
                    Err(BatchFailure::Engine(err)) => return Err(err),
                }
            }

            if !full {
                break;
            }
        }

        if !report.cancelled {
            report.detached = self.detach_finished_once(&failed)?;
        }
        report.failed = failed.into_iter().collect();
        info!(
            head = report.head.value(),
            batches = report.batches,
            applied = report.events_applied,
            failed = report.failed.len(),
            "catch-up finished"
        );
        Ok(report)
    }

    /// Wipe a projection and replay it from the first event.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSubscription`] if no handler is registered under
    /// `id`, otherwise the errors of [`Self::catch_up`].
    pub fn reset(&mut self, id: &str) -> Result<CatchUpReport, EngineError> {
        let subscriber = self
            .subscribers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::UnknownSubscription(id.to_string()))?;

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        subscriber.handler.reset(&tx)?;
        if store::find(&tx, id)?.is_none() {
            store::register(&tx, id, subscriber.run_mode, SequenceNumber::ZERO)?;
        }
        store::rewind(&tx, id)?;
        tx.commit()?;
        info!(subscription = %id, "subscription reset");

        self.catch_up(&CancellationToken::new())
    }

    fn detach_finished_once(&self, failed: &BTreeSet<String>) -> Result<Vec<String>, EngineError> {
        let head = self.store.head()?;
        let mut detached = Vec::new();
        for row in store::all(&self.conn)? {
            if row.run_mode == RunMode::Once
                && !failed.contains(&row.id)
                && row.status != SubscriptionStatus::Detached
                && row.status != SubscriptionStatus::Error
                && row.position >= head
            {
                store::set_status(&self.conn, &row.id, SubscriptionStatus::Detached)?;
                debug!(subscription = %row.id, "once subscription reached head");
                detached.push(row.id);
            }
        }
        Ok(detached)
    }
}

enum BatchFailure {
    Handler {
        message: String,
        previous: SubscriptionStatus,
    },
    Engine(EngineError),
}

impl From<rusqlite::Error> for BatchFailure {
    fn from(err: rusqlite::Error) -> Self {
        Self::Engine(err.into())
    }
}

impl From<ProjectionError> for BatchFailure {
    fn from(err: ProjectionError) -> Self {
        Self::Engine(err.into())
    }
}

/// Apply `batch` to one subscriber inside its own transaction. Returns the
/// number of events handed to the handler.
fn apply_batch(
    conn: &mut Connection,
    subscriber: &mut Subscriber,
    batch: &[Decoded],
    head: SequenceNumber,
    max_retries: u32,
) -> Result<usize, BatchFailure> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let Some(current) = store::find(&tx, &subscriber.id)? else {
        return Ok(0);
    };
    if !current.wants_events(max_retries) {
        return Ok(0);
    }
    let pending: Vec<&Decoded> = batch
        .iter()
        .filter(|(envelope, _)| envelope.sequence_number > current.position)
        .collect();
    let Some(last) = pending.last().map(|(envelope, _)| envelope.sequence_number) else {
        return Ok(0);
    };
    let previous = match (&current.status, &current.error) {
        (SubscriptionStatus::Error, Some(error)) => error.previous_status,
        (status, _) => *status,
    };

    let handler = &mut subscriber.handler;
    let outcome = (|| -> Result<usize, ProjectionError> {
        handler.start_batch(&tx)?;
        let mut applied = 0;
        for (envelope, data) in &pending {
            match data {
                Ok(Some(data)) => {
                    handler.handle(&tx, data, envelope)?;
                    applied += 1;
                }
                Ok(None) => {}
                Err(message) => {
                    return Err(ProjectionError::Corrupt(format!(
                        "event {}: {message}",
                        envelope.sequence_number.value()
                    )));
                }
            }
        }
        handler.end_batch(&tx)?;
        let status = if last >= head {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Booting
        };
        store::save_position(&tx, &subscriber.id, last, status)?;
        Ok(applied)
    })();

    match outcome {
        Ok(applied) => {
            tx.commit()?;
            Ok(applied)
        }
        Err(err) => {
            drop(tx);
            handler.abort_batch();
            Err(BatchFailure::Handler {
                message: err.to_string(),
                previous,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::event::data::{ContentStreamWasClosed, ContentStreamWasCreated};
    use crate::event::{EventMetadata, to_new_event};
    use crate::model::ContentStreamId;
    use crate::store::{ExpectedVersion, InMemoryEventStore, NewEvent, StreamName};

    /// Records the sequence numbers it sees; fails on closed streams when
    /// `fail_on_close` is set.
    struct Recorder {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_on_close: Arc<AtomicBool>,
    }

    impl ProjectionHandler for Recorder {
        fn handle(
            &mut self,
            _tx: &Connection,
            event: &EventData,
            envelope: &EventEnvelope,
        ) -> Result<(), ProjectionError> {
            if self.fail_on_close.load(Ordering::SeqCst)
                && matches!(event, EventData::ContentStreamWasClosed(_))
            {
                return Err(ProjectionError::Corrupt("closing is not supported".to_string()));
            }
            self.seen.lock().expect("seen").push(envelope.sequence_number.value());
            Ok(())
        }

        fn reset(&mut self, _tx: &Connection) -> Result<(), ProjectionError> {
            self.seen.lock().expect("seen").clear();
            Ok(())
        }
    }

    struct Probe {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_on_close: Arc<AtomicBool>,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
                fail_on_close: Arc::new(AtomicBool::new(false)),
            }
        }

        fn handler(&self) -> Box<dyn ProjectionHandler> {
            Box::new(Recorder {
                seen: Arc::clone(&self.seen),
                fail_on_close: Arc::clone(&self.fail_on_close),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().expect("seen").clone()
        }
    }

    fn created(id: &str) -> NewEvent {
        let data = EventData::ContentStreamWasCreated(ContentStreamWasCreated {
            content_stream_id: ContentStreamId::new_unchecked(id),
        });
        to_new_event(&data, &EventMetadata::default()).expect("event")
    }

    fn closed(id: &str) -> NewEvent {
        let data = EventData::ContentStreamWasClosed(ContentStreamWasClosed {
            content_stream_id: ContentStreamId::new_unchecked(id),
        });
        to_new_event(&data, &EventMetadata::default()).expect("event")
    }

    fn append(store: &InMemoryEventStore, stream: &str, events: Vec<NewEvent>) {
        store
            .append(&StreamName::new(stream), events, ExpectedVersion::Any)
            .expect("append");
    }

    fn engine(store: &Arc<InMemoryEventStore>, batch_size: usize) -> SubscriptionEngine {
        let conn = crate::db::open_projection_in_memory().expect("projection db");
        let config = EngineConfig {
            batch_size,
            max_retry_attempts: 2,
        };
        SubscriptionEngine::new(Arc::clone(store) as Arc<dyn EventStore>, conn, config)
    }

    fn row(engine: &SubscriptionEngine, id: &str) -> Subscription {
        store::find(engine.connection(), id).expect("find").expect("row")
    }

    #[test]
    fn catch_up_applies_every_event_in_batches() {
        let events = Arc::new(InMemoryEventStore::new());
        for i in 0..5 {
            append(&events, &format!("s{i}"), vec![created(&format!("cs{i}"))]);
        }
        let probe = Probe::new();
        let mut engine = engine(&events, 2);
        engine.register("p", RunMode::FromBeginning, probe.handler());
        engine.setup().expect("setup");

        let report = engine.catch_up(&CancellationToken::new()).expect("catch up");
        assert_eq!(report.batches, 3);
        assert_eq!(report.events_applied, 5);
        assert_eq!(probe.seen(), vec![1, 2, 3, 4, 5]);
        let sub = row(&engine, "p");
        assert_eq!(sub.position, SequenceNumber::new(5));
        assert_eq!(sub.status, SubscriptionStatus::Active);

        let again = engine.catch_up(&CancellationToken::new()).expect("catch up");
        assert_eq!(again.events_applied, 0);
        assert_eq!(probe.seen().len(), 5);
    }

    #[test]
    fn failing_subscriber_does_not_hold_back_the_others() {
        let events = Arc::new(InMemoryEventStore::new());
        append(&events, "a", vec![created("a"), closed("a"), created("b")]);
        let healthy = Probe::new();
        let broken = Probe::new();
        broken.fail_on_close.store(true, Ordering::SeqCst);

        let mut engine = engine(&events, 10);
        engine.register("healthy", RunMode::FromBeginning, healthy.handler());
        engine.register("broken", RunMode::FromBeginning, broken.handler());
        engine.setup().expect("setup");

        let report = engine.catch_up(&CancellationToken::new()).expect("catch up");
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert_eq!(healthy.seen(), vec![1, 2, 3]);

        let failed = row(&engine, "broken");
        assert_eq!(failed.status, SubscriptionStatus::Error);
        assert_eq!(failed.position, SequenceNumber::ZERO);
        assert_eq!(failed.retry_attempt, 1);
        let error = failed.error.expect("error");
        assert!(error.message.contains("closing is not supported"));
        assert_eq!(error.previous_status, SubscriptionStatus::New);
        assert_eq!(row(&engine, "healthy").position, SequenceNumber::new(3));
    }

    #[test]
    fn errored_subscription_recovers_within_retry_budget() {
        let events = Arc::new(InMemoryEventStore::new());
        append(&events, "a", vec![created("a"), closed("a")]);
        let probe = Probe::new();
        probe.fail_on_close.store(true, Ordering::SeqCst);
        let mut engine = engine(&events, 10);
        engine.register("p", RunMode::FromBeginning, probe.handler());
        engine.setup().expect("setup");

        engine.catch_up(&CancellationToken::new()).expect("first run");
        engine.catch_up(&CancellationToken::new()).expect("second run");
        assert_eq!(row(&engine, "p").retry_attempt, 2);

        // Budget exhausted: the subscription is no longer fed.
        probe.fail_on_close.store(false, Ordering::SeqCst);
        let report = engine.catch_up(&CancellationToken::new()).expect("third run");
        assert_eq!(report.batches, 0);
        assert_eq!(row(&engine, "p").status, SubscriptionStatus::Error);

        engine.reset("p").expect("reset");
        let sub = row(&engine, "p");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.position, SequenceNumber::new(2));
        assert_eq!(probe.seen(), vec![1, 2]);
    }

    #[test]
    fn from_now_skips_history_and_once_detaches() {
        let events = Arc::new(InMemoryEventStore::new());
        append(&events, "a", vec![created("a"), closed("a")]);
        let follower = Probe::new();
        let once = Probe::new();
        let mut engine = engine(&events, 10);
        engine.register("follower", RunMode::FromNow, follower.handler());
        engine.register("once", RunMode::Once, once.handler());
        engine.setup().expect("setup");

        append(&events, "b", vec![created("b")]);
        let report = engine.catch_up(&CancellationToken::new()).expect("catch up");
        assert_eq!(follower.seen(), vec![3]);
        assert_eq!(once.seen(), vec![1, 2, 3]);
        assert_eq!(report.detached, vec!["once".to_string()]);

        append(&events, "c", vec![created("c")]);
        engine.catch_up(&CancellationToken::new()).expect("catch up");
        assert_eq!(follower.seen(), vec![3, 4]);
        assert_eq!(once.seen(), vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_token_stops_before_the_first_batch() {
        let events = Arc::new(InMemoryEventStore::new());
        append(&events, "a", vec![created("a")]);
        let probe = Probe::new();
        let mut engine = engine(&events, 10);
        engine.register("p", RunMode::FromBeginning, probe.handler());
        engine.setup().expect("setup");

        let token = CancellationToken::new();
        token.cancel();
        let report = engine.catch_up(&token).expect("catch up");
        assert!(report.cancelled);
        assert!(probe.seen().is_empty());
        assert_eq!(row(&engine, "p").status, SubscriptionStatus::New);
    }

    #[test]
    fn setup_detaches_rows_without_handler() {
        let events = Arc::new(InMemoryEventStore::new());
        let mut engine = engine(&events, 10);
        store::register(engine.connection(), "orphan", RunMode::FromBeginning, SequenceNumber::ZERO)
            .expect("register");
        engine.register("p", RunMode::FromBeginning, Probe::new().handler());
        engine.setup().expect("setup");

        assert_eq!(row(&engine, "orphan").status, SubscriptionStatus::Detached);
        assert!(matches!(
            engine.reset("orphan"),
            Err(EngineError::UnknownSubscription(id)) if id == "orphan"
        ));
    }
}
