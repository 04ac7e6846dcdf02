//! Row access for the `subscriptions` table.
//!
//! Timestamps are stored as microseconds since the epoch. Every function
//! takes a plain `&Connection` so it can run inside the engine's batch
//! transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::projection::{ProjectionError, to_i64, to_u64};
use crate::store::SequenceNumber;

use super::{RunMode, Subscription, SubscriptionError, SubscriptionStatus};

const COLUMNS: &str = "subscription_id, run_mode, status, position, retry_attempt, \
     error_message, error_previous_status, error_at_us, last_saved_at_us";

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, ProjectionError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| ProjectionError::Corrupt(format!("timestamp {us} out of range")))
}

struct RawRow {
    id: String,
    run_mode: String,
    status: String,
    position: i64,
    retry_attempt: i64,
    error_message: Option<String>,
    error_previous_status: Option<String>,
    error_at_us: Option<i64>,
    last_saved_at_us: i64,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        run_mode: row.get(1)?,
        status: row.get(2)?,
        position: row.get(3)?,
        retry_attempt: row.get(4)?,
        error_message: row.get(5)?,
        error_previous_status: row.get(6)?,
        error_at_us: row.get(7)?,
        last_saved_at_us: row.get(8)?,
    })
}

fn parse_status(raw: &str) -> Result<SubscriptionStatus, ProjectionError> {
    SubscriptionStatus::parse(raw)
        .ok_or_else(|| ProjectionError::Corrupt(format!("unknown subscription status '{raw}'")))
}

impl TryFrom<RawRow> for Subscription {
    type Error = ProjectionError;

    fn try_from(raw: RawRow) -> Result<Self, Self::Error> {
        let run_mode = RunMode::parse(&raw.run_mode)
            .ok_or_else(|| {
                ProjectionError::Corrupt(format!("unknown run mode '{}'", raw.run_mode))
            })?;
        let error = match (raw.error_message, raw.error_previous_status, raw.error_at_us) {
            (Some(message), Some(previous), Some(at)) => Some(SubscriptionError {
                message,
                previous_status: parse_status(&previous)?,
                occurred_at: from_micros(at)?,
            }),
            _ => None,
        };
        Ok(Self {
            status: parse_status(&raw.status)?,
            position: SequenceNumber::new(to_u64(raw.position)?),
            retry_attempt: u32::try_from(raw.retry_attempt).map_err(|_| {
                ProjectionError::Corrupt(format!(
                    "retry attempt {} out of range",
                    raw.retry_attempt
                ))
            })?,
            last_saved_at: from_micros(raw.last_saved_at_us)?,
            id: raw.id,
            run_mode,
            error,
        })
    }
}

/// Load one subscription.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`] for a row that
/// does not parse.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Subscription>, ProjectionError> {
    let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE subscription_id = ?1");
    let raw = conn.query_row(&sql, params![id], raw_row).optional()?;
    raw.map(Subscription::try_from).transpose()
}

/// All subscriptions ordered by id.
///
/// # Errors
///
/// Returns the SQLite error or [`ProjectionError::Corrupt`].
pub fn all(conn: &Connection) -> Result<Vec<Subscription>, ProjectionError> {
    let sql = format!("SELECT {COLUMNS} FROM subscriptions ORDER BY subscription_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], raw_row)?;
    rows.map(|row| Subscription::try_from(row?)).collect()
}

/// Insert a subscription in status NEW unless it already exists.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn register(
    conn: &Connection,
    id: &str,
    run_mode: RunMode,
    position: SequenceNumber,
) -> Result<bool, ProjectionError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO subscriptions
            (subscription_id, run_mode, status, position, retry_attempt, last_saved_at_us)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            id,
            run_mode.as_str(),
            SubscriptionStatus::New.as_str(),
            to_i64(position.value())?,
            micros(Utc::now()),
        ],
    )?;
    Ok(inserted == 1)
}

/// Record a successfully applied batch: new position, ACTIVE, error cleared.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn save_position(
    conn: &Connection,
    id: &str,
    position: SequenceNumber,
    status: SubscriptionStatus,
) -> Result<(), ProjectionError> {
    conn.execute(
        "UPDATE subscriptions
            SET position = ?2, status = ?3, retry_attempt = 0,
                error_message = NULL, error_previous_status = NULL, error_at_us = NULL,
                last_saved_at_us = ?4
          WHERE subscription_id = ?1",
        params![id, to_i64(position.value())?, status.as_str(), micros(Utc::now())],
    )?;
    Ok(())
}

/// Change the status only.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: SubscriptionStatus,
) -> Result<(), ProjectionError> {
    conn.execute(
        "UPDATE subscriptions SET status = ?2, last_saved_at_us = ?3 WHERE subscription_id = ?1",
        params![id, status.as_str(), micros(Utc::now())],
    )?;
    Ok(())
}

/// Put a subscription in ERROR and count the attempt. The position is left
/// where the last successful batch put it.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn record_error(
    conn: &Connection,
    id: &str,
    message: &str,
    previous_status: SubscriptionStatus,
) -> Result<(), ProjectionError> {
    let now = micros(Utc::now());
    conn.execute(
        "UPDATE subscriptions
            SET status = ?2, retry_attempt = retry_attempt + 1,
                error_message = ?3, error_previous_status = ?4, error_at_us = ?5,
                last_saved_at_us = ?5
          WHERE subscription_id = ?1",
        params![
            id,
            SubscriptionStatus::Error.as_str(),
            message,
            previous_status.as_str(),
            now,
        ],
    )?;
    Ok(())
}

/// Rewind a subscription to the start of the log in status NEW.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn rewind(conn: &Connection, id: &str) -> Result<(), ProjectionError> {
    conn.execute(
        "UPDATE subscriptions
            SET position = 0, status = ?2, retry_attempt = 0,
                error_message = NULL, error_previous_status = NULL, error_at_us = NULL,
                last_saved_at_us = ?3
          WHERE subscription_id = ?1",
        params![id, SubscriptionStatus::New.as_str(), micros(Utc::now())],
    )?;
    Ok(())
}

/// Mark every subscription whose id is not in `registered` as DETACHED.
/// Returns the ids that were detached.
///
/// # Errors
///
/// Returns the SQLite error.
pub fn detach_unregistered(
    conn: &Connection,
    registered: &[&str],
) -> Result<Vec<String>, ProjectionError> {
    let mut detached = Vec::new();
    for subscription in all(conn)? {
        if subscription.status != SubscriptionStatus::Detached
            && !registered.contains(&subscription.id.as_str())
        {
            set_status(conn, &subscription.id, SubscriptionStatus::Detached)?;
            detached.push(subscription.id);
        }
    }
    Ok(detached)
}
