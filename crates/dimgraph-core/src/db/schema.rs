//! SQLite schemas.
//!
//! Two databases are involved and may share one file:
//! - the event log (`events`), authoritative and append-only
//! - the projection database, disposable and rebuilt by replaying the log:
//!   - `subscriptions` holds one checkpoint row per subscriber
//!   - `content_streams` / `workspaces` are the registry projections
//!   - `content_graphs` holds one serialized graph arena per content stream,
//!     with the stream version it reflects
//!   - `projection_meta` records the schema version

/// Event log table. Versions are 0-based per stream; the sequence number is
/// the global order every subscriber reads in.
pub const EVENTS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    sequence_number INTEGER PRIMARY KEY AUTOINCREMENT,
    stream TEXT NOT NULL CHECK (length(stream) > 0),
    version INTEGER NOT NULL CHECK (version >= 0),
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    recorded_at TEXT NOT NULL,
    UNIQUE (stream, version)
);

CREATE INDEX IF NOT EXISTS idx_events_stream ON events(stream, version);
";

/// Migration v1 of the projection database.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id TEXT PRIMARY KEY,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('fromBeginning', 'fromNow', 'once')),
    status TEXT NOT NULL
        CHECK (status IN ('new', 'booting', 'active', 'detached', 'error')),
    position INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
    retry_attempt INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    error_previous_status TEXT,
    error_at_us INTEGER,
    last_saved_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS content_streams (
    content_stream_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    source_content_stream_id TEXT,
    source_version INTEGER,
    state TEXT NOT NULL CHECK (state IN ('new', 'open', 'closed')),
    state_before_close TEXT
        CHECK (state_before_close IS NULL OR state_before_close IN ('new', 'open')),
    removed INTEGER NOT NULL DEFAULT 0 CHECK (removed IN (0, 1))
);

CREATE TABLE IF NOT EXISTS workspaces (
    workspace_name TEXT PRIMARY KEY,
    base_workspace_name TEXT,
    current_content_stream_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('upToDate', 'outdated'))
);

CREATE INDEX IF NOT EXISTS idx_workspaces_base ON workspaces(base_workspace_name);
CREATE INDEX IF NOT EXISTS idx_workspaces_stream ON workspaces(current_content_stream_id);

CREATE TABLE IF NOT EXISTS content_graphs (
    content_stream_id TEXT PRIMARY KEY,
    graph_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projection_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO projection_meta (id, schema_version) VALUES (1, 0);
";

/// Migration v2: graph rows record the stream version they reflect. Existing
/// rows carry no version, so the graph is rebuilt from the log.
pub const MIGRATION_V2_SQL: &str = r"
ALTER TABLE content_graphs ADD COLUMN version INTEGER NOT NULL DEFAULT 0 CHECK (version >= 0);

DELETE FROM content_graphs;

UPDATE subscriptions
SET position = 0,
    status = 'new',
    retry_attempt = 0,
    error_message = NULL,
    error_previous_status = NULL,
    error_at_us = NULL
WHERE subscription_id = 'contentGraph';
";

/// Tables every fresh projection database must contain.
pub const REQUIRED_TABLES: &[&str] = &[
    "subscriptions",
    "content_streams",
    "workspaces",
    "content_graphs",
    "projection_meta",
];
