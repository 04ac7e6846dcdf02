//! SQLite storage utilities.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so catch-up readers do not block command writers
//! - `busy_timeout` (5s unless configured) bounds every storage round-trip
//! - `foreign_keys = ON`

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used when the configuration does not set one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the projection database, apply pragmas and migrate.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_projection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    ensure_parent_dir(path)?;
    let mut conn = Connection::open(path)
        .with_context(|| format!("open projection database {}", path.display()))?;

    configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply projection migrations")?;
    Ok(conn)
}

/// In-memory projection database, migrated. Used by tests and dry runs.
///
/// # Errors
///
/// Returns an error if the migrations fail.
pub fn open_projection_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory projection database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrate(&mut conn).context("apply projection migrations")?;
    Ok(conn)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Apply the runtime pragmas to a file-backed connection.
///
/// # Errors
///
/// Returns the SQLite error if a pragma cannot be set.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}
