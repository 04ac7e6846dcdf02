//! Schema migrations for the projection database.
//!
//! The schema version lives in `PRAGMA user_version` and is mirrored into
//! `projection_meta.schema_version`. A database written by a newer binary is
//! refused instead of being migrated down.

use super::schema;
use rusqlite::{Connection, types::Type};

/// One forward step of the projection schema.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "subscriptions, content streams, workspaces, content graphs",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "content graph versions",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("projection schema version {found} is newer than supported version {supported}")]
    TooNew { found: u32, supported: u32 },
}

/// Read `PRAGMA user_version` as `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the stored value does not fit
/// in `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Bring the schema up to [`LATEST_SCHEMA_VERSION`], one transaction per
/// migration. Returns the resulting version.
///
/// # Errors
///
/// [`MigrationError::TooNew`] for a database from a newer binary, otherwise
/// the SQLite error of the failing step.
pub fn migrate(conn: &mut Connection) -> Result<u32, MigrationError> {
    let found = current_schema_version(conn)?;
    if found > LATEST_SCHEMA_VERSION {
        return Err(MigrationError::TooNew {
            found,
            supported: LATEST_SCHEMA_VERSION,
        });
    }

    let mut current = found;
    for migration in MIGRATIONS.iter().filter(|m| m.version > found) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", i64::from(migration.version))?;
        tx.execute(
            "UPDATE projection_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(migration.version)],
        )?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "projection schema migrated"
        );
        current = migration.version;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, MIGRATIONS, MigrationError, current_schema_version, migrate};
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![name],
            |row| row.get(0),
        )
    }

    #[test]
    fn migrations_are_ordered_and_end_at_latest() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.last().copied(), Some(LATEST_SCHEMA_VERSION));
    }

    #[test]
    fn empty_database_reaches_latest() {
        let mut conn = Connection::open_in_memory().expect("db");
        assert_eq!(migrate(&mut conn).expect("migrate"), LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn).expect("version"), LATEST_SCHEMA_VERSION);
        for table in schema::REQUIRED_TABLES {
            assert!(table_exists(&conn, table).expect("query"), "missing table {table}");
        }

        // A second run has nothing left to do.
        assert_eq!(migrate(&mut conn).expect("again"), LATEST_SCHEMA_VERSION);
        let schema_version: i64 = conn
            .query_row("SELECT schema_version FROM projection_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .expect("meta");
        assert_eq!(schema_version, i64::from(LATEST_SCHEMA_VERSION));
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().expect("db");
        conn.pragma_update(None, "user_version", i64::from(LATEST_SCHEMA_VERSION + 1))
            .expect("pragma");
        let err = migrate(&mut conn).expect_err("too new");
        assert!(matches!(
            err,
            MigrationError::TooNew { found, supported }
                if found == LATEST_SCHEMA_VERSION + 1 && supported == LATEST_SCHEMA_VERSION
        ));
    }

    #[test]
    fn content_stream_state_is_checked() {
        let mut conn = Connection::open_in_memory().expect("db");
        migrate(&mut conn).expect("migrate");
        let result = conn.execute(
            "INSERT INTO content_streams (content_stream_id, version, state) \
             VALUES ('cs', 0, 'reopened')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn unversioned_graphs_are_rebuilt() {
        let mut conn = Connection::open_in_memory().expect("db");
        conn.execute_batch(schema::MIGRATION_V1_SQL).expect("v1");
        conn.pragma_update(None, "user_version", 1_i64).expect("pragma");
        conn.execute_batch(
            "INSERT INTO content_graphs (content_stream_id, graph_json) VALUES ('cs', '{}');
             INSERT INTO subscriptions
                 (subscription_id, run_mode, status, position, last_saved_at_us)
             VALUES ('contentGraph', 'fromBeginning', 'active', 12, 0),
                    ('contentStream', 'fromBeginning', 'active', 12, 0);",
        )
        .expect("seed");

        assert_eq!(migrate(&mut conn).expect("migrate"), LATEST_SCHEMA_VERSION);

        let graphs: i64 = conn
            .query_row("SELECT COUNT(*) FROM content_graphs", [], |row| row.get(0))
            .expect("count");
        assert_eq!(graphs, 0);
        let checkpoint = |id: &str| -> (String, i64) {
            conn.query_row(
                "SELECT status, position FROM subscriptions WHERE subscription_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("subscription")
        };
        assert_eq!(checkpoint("contentGraph"), ("new".to_string(), 0));
        assert_eq!(checkpoint("contentStream"), ("active".to_string(), 12));
    }
}
