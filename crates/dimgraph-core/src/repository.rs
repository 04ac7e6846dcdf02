//! The content repository: configuration, event store, projections and the
//! command pipeline behind one handle.
//!
//! ```text
//! handle(command)
//!   decide   -> EventsToPublish        (reads projections)
//!   append   -> CommitResult           (ExpectedVersion CAS)
//!   catch_up -> projections current
//! ```
//!
//! A concurrency conflict catches up and decides again, up to
//! `commands.max_concurrency_retries` times.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::command::{checks, Command, CommandError, ContentStreamLookup, EventsToPublish, decide};
use crate::config::{ConfigError, ContentModel, RepositoryConfig};
use crate::db;
use crate::error::ErrorCode;
use crate::graph::{Adjustment, ContentGraph, check_integrity};
use crate::lock::lock_path_for;
use crate::model::{ContentStreamId, WorkspaceName};
use crate::projection::content_stream::ContentStreamRecord;
use crate::projection::workspace::WorkspaceRecord;
use crate::projection::{
    CONTENT_GRAPH_SUBSCRIPTION, CONTENT_STREAM_SUBSCRIPTION, ContentGraphProjection,
    ContentStreamProjection, WORKSPACE_SUBSCRIPTION, WorkspaceProjection, content_graph,
    content_stream, workspace,
};
use crate::store::{
    CommitResult, EventStore, ExpectedVersion, InMemoryEventStore, NewEvent, SqliteEventStore,
    StreamName, Version,
};
use crate::subscription::{
    CancellationToken, CatchUpReport, EngineError, RunMode, Subscription, SubscriptionEngine,
};

/// File name of the event log inside a repository directory.
pub const EVENTS_DB_FILE: &str = "events.sqlite3";
/// File name of the projection database inside a repository directory.
pub const PROJECTION_DB_FILE: &str = "projection.sqlite3";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl RepositoryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config(err) => err.code(),
            Self::Engine(err) => err.code(),
            Self::Sqlite(_) => ErrorCode::CorruptProjection,
        }
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(store) => Self::from(store),
            other => Self::Projection(other.to_string()),
        }
    }
}

pub struct ContentRepository {
    config: RepositoryConfig,
    model: ContentModel,
    store: Arc<dyn EventStore>,
    engine: SubscriptionEngine,
}

impl ContentRepository {
    /// Wire `store` and the projection database `conn` together and register
    /// the shipped projections.
    ///
    /// # Errors
    ///
    /// Returns the configuration error if the content model does not build,
    /// or the engine error if the projection database cannot be set up.
    pub fn new(
        config: RepositoryConfig,
        store: Arc<dyn EventStore>,
        conn: Connection,
    ) -> Result<Self, RepositoryError> {
        let engine = SubscriptionEngine::new(Arc::clone(&store), conn, config.engine);
        Self::with_engine(config, store, engine)
    }

    /// A repository backed entirely by memory.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn in_memory(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::new(config, Arc::new(InMemoryEventStore::new()), conn)
    }

    /// Open (or create) the SQLite-backed repository in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be opened or migrated.
    pub fn open(config: RepositoryConfig, dir: &Path) -> anyhow::Result<Self> {
        let busy_timeout = config.storage.busy_timeout();
        let store: Arc<dyn EventStore> =
            Arc::new(SqliteEventStore::open(&dir.join(EVENTS_DB_FILE), busy_timeout)?);
        let projection_path = dir.join(PROJECTION_DB_FILE);
        let conn = db::open_projection(&projection_path, busy_timeout)?;
        let engine = SubscriptionEngine::new(Arc::clone(&store), conn, config.engine)
            .with_lock(lock_path_for(&projection_path), busy_timeout);
        Self::with_engine(config, store, engine)
            .with_context(|| format!("set up repository in {}", dir.display()))
    }

    fn with_engine(
        config: RepositoryConfig,
        store: Arc<dyn EventStore>,
        mut engine: SubscriptionEngine,
    ) -> Result<Self, RepositoryError> {
        let model = config.content_model()?;
        engine.register(
            CONTENT_STREAM_SUBSCRIPTION,
            RunMode::FromBeginning,
            Box::new(ContentStreamProjection::new()),
        );
        engine.register(
            WORKSPACE_SUBSCRIPTION,
            RunMode::FromBeginning,
            Box::new(WorkspaceProjection::new()),
        );
        engine.register(
            CONTENT_GRAPH_SUBSCRIPTION,
            RunMode::FromBeginning,
            Box::new(ContentGraphProjection::new()),
        );
        engine.setup()?;
        Ok(Self {
            config,
            model,
            store,
            engine,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    #[must_use]
    pub const fn model(&self) -> &ContentModel {
        &self.model
    }

    #[must_use]
    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    /// The projection database.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        self.engine.connection()
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Decide, append and project `command`.
    ///
    /// # Errors
    ///
    /// The [`CommandError`] of the first violated precondition, or a
    /// concurrency error once the retry budget is spent.
    pub fn handle(&mut self, command: &Command) -> Result<CommitResult, CommandError> {
        let max_retries = self.config.commands.max_concurrency_retries;
        let mut attempt = 0;
        loop {
            let result =
                decide(command, &self.model, &*self).and_then(|events| self.publish(&events));
            match result {
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    info!(command = command.name(), attempt, error = %err, "retrying command");
                    self.catch_up()?;
                }
                other => return other,
            }
        }
    }

    /// Append a decided batch and bring the projections up to date.
    ///
    /// # Errors
    ///
    /// [`CommandError::ConcurrencyConflict`] if the expected version no
    /// longer holds, otherwise storage errors.
    pub fn publish(&mut self, events: &EventsToPublish) -> Result<CommitResult, CommandError> {
        self.append(&events.stream, events.to_new_events()?, events.expected_version)
    }

    /// Append already encoded events, each with its own metadata, and catch
    /// up.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    pub fn append(
        &mut self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult, CommandError> {
        let committed = self.store.append(stream, events, expected).inspect_err(|err| {
            if err.is_concurrency_conflict() {
                tracing::warn!(stream = %stream, error = %err, "append rejected");
            }
        })?;
        debug!(
            stream = %stream,
            version = committed.version.value(),
            sequence_number = committed.sequence_number.value(),
            "events appended"
        );
        self.catch_up()?;
        Ok(committed)
    }

    /// Current version of a stream in the event store.
    ///
    /// # Errors
    ///
    /// Returns the storage error.
    pub fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>, CommandError> {
        Ok(self.store.stream_version(stream)?)
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    /// Run catch-up for every subscription.
    ///
    /// # Errors
    ///
    /// Returns engine errors; handler failures are reported, not raised.
    pub fn catch_up(&mut self) -> Result<CatchUpReport, EngineError> {
        self.engine.catch_up(&CancellationToken::new())
    }

    /// Run catch-up with an external cancellation token.
    ///
    /// # Errors
    ///
    /// See [`Self::catch_up`].
    pub fn catch_up_with(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CatchUpReport, EngineError> {
        self.engine.catch_up(cancel)
    }

    /// Wipe one projection and replay it.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSubscription`] for an unknown id.
    pub fn reset(&mut self, subscription_id: &str) -> Result<CatchUpReport, EngineError> {
        self.engine.reset(subscription_id)
    }

    /// # Errors
    ///
    /// Returns the SQLite error.
    pub fn subscriptions(&self) -> Result<Vec<Subscription>, EngineError> {
        self.engine.status()
    }

    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    pub fn workspace(&self, name: &WorkspaceName) -> Result<Option<WorkspaceRecord>, CommandError> {
        Ok(workspace::find(self.connection(), name)?)
    }

    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    pub fn workspaces(&self) -> Result<Vec<WorkspaceRecord>, CommandError> {
        Ok(workspace::all(self.connection())?)
    }

    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    pub fn content_streams(&self) -> Result<Vec<ContentStreamRecord>, CommandError> {
        Ok(content_stream::all(self.connection())?)
    }

    // -----------------------------------------------------------------------
    // Structure adjustments
    // -----------------------------------------------------------------------

    /// Report every structural problem of a content stream's graph.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the graph cannot be read.
    pub fn check_integrity(
        &self,
        content_stream_id: &ContentStreamId,
    ) -> Result<Vec<Adjustment>, CommandError> {
        let graph = self.content_graph(content_stream_id)?;
        Ok(check_integrity(&graph, &self.model, content_stream_id))
    }

    /// Append the remediation of `adjustment`. Adjustments without one are
    /// left alone and return `None`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::publish`], or
    /// [`CommandError::ContentStreamDoesNotExistYet`] for an unknown stream.
    pub fn apply_adjustment(
        &mut self,
        content_stream_id: &ContentStreamId,
        adjustment: &Adjustment,
    ) -> Result<Option<CommitResult>, CommandError> {
        let Some(events) = adjustment.remediation.clone() else {
            return Ok(None);
        };
        let (record, _) = checks::load_writable(&*self, content_stream_id)?;
        info!(
            content_stream = %content_stream_id,
            kind = adjustment.kind.as_str(),
            events = events.len(),
            "applying structure adjustment"
        );
        let batch = EventsToPublish::for_content_stream(&record, events);
        self.publish(&batch).map(Some)
    }
}

impl ContentStreamLookup for ContentRepository {
    fn content_stream(
        &self,
        id: &ContentStreamId,
    ) -> Result<Option<ContentStreamRecord>, CommandError> {
        Ok(content_stream::find(self.connection(), id)?)
    }

    fn is_in_use(&self, id: &ContentStreamId) -> Result<bool, CommandError> {
        Ok(workspace::is_content_stream_in_use(self.connection(), id)?)
    }

    fn content_graph(&self, id: &ContentStreamId) -> Result<ContentGraph, CommandError> {
        Ok(content_graph::load(self.connection(), id)?)
    }

    fn content_graph_version(&self, id: &ContentStreamId) -> Result<Option<Version>, CommandError> {
        Ok(content_graph::load_version(self.connection(), id)?)
    }
}
