//! Checkpointed catch-up subscriptions.
//!
//! # Overview
//!
//! A subscription pairs a [`crate::projection::ProjectionHandler`] with a
//! row in the `subscriptions` table holding its position in the global event
//! order. The [`SubscriptionEngine`] reads the log in batches and applies
//! each batch to each subscriber in its own `BEGIN IMMEDIATE` transaction,
//! writing the new position before the commit. A crash between batches
//! therefore never loses or repeats an event.
//!
//! # Status lifecycle
//!
//! ```text
//! NEW -> BOOTING -> ACTIVE
//!          |          |
//!          +--> ERROR <+      (handler failure; retried on the next run)
//! ONCE subscriptions: ACTIVE -> DETACHED after reaching the head
//! unregistered subscriptions: -> DETACHED on setup
//! ```

pub mod engine;
pub mod store;

pub use engine::{CancellationToken, CatchUpReport, EngineError, SubscriptionEngine};

use std::fmt;

use chrono::{DateTime, Utc};

use crate::store::SequenceNumber;

/// How a subscription joins the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Replays the whole log, then follows it.
    FromBeginning,
    /// Starts at the head current at registration, then follows it.
    FromNow,
    /// Catches up on demand and detaches at the head until reset.
    Once,
}

impl RunMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FromBeginning => "fromBeginning",
            Self::FromNow => "fromNow",
            Self::Once => "once",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fromBeginning" => Some(Self::FromBeginning),
            "fromNow" => Some(Self::FromNow),
            "once" => Some(Self::Once),
            _ => None,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    New,
    Booting,
    Active,
    Detached,
    Error,
}

impl SubscriptionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Booting => "booting",
            Self::Active => "active",
            Self::Detached => "detached",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(Self::New),
            "booting" => Some(Self::Booting),
            "active" => Some(Self::Active),
            "detached" => Some(Self::Detached),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure that put a subscription into [`SubscriptionStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionError {
    pub message: String,
    pub previous_status: SubscriptionStatus,
    pub occurred_at: DateTime<Utc>,
}

/// One row of the `subscriptions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub run_mode: RunMode,
    pub status: SubscriptionStatus,
    /// Sequence number of the last applied event.
    pub position: SequenceNumber,
    /// Failed attempts since the last successful batch.
    pub retry_attempt: u32,
    pub error: Option<SubscriptionError>,
    pub last_saved_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether catch-up should feed this subscription, given the retry
    /// budget.
    #[must_use]
    pub const fn wants_events(&self, max_retry_attempts: u32) -> bool {
        match self.status {
            SubscriptionStatus::New
            | SubscriptionStatus::Booting
            | SubscriptionStatus::Active => true,
            SubscriptionStatus::Error => self.retry_attempt < max_retry_attempts,
            SubscriptionStatus::Detached => false,
        }
    }

    /// JSON form used by `dg status --json`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "runMode": self.run_mode.as_str(),
            "status": self.status.as_str(),
            "position": self.position.value(),
            "retryAttempt": self.retry_attempt,
            "error": self.error.as_ref().map(|e| serde_json::json!({
                "message": e.message,
                "previousStatus": e.previous_status.as_str(),
                "at": e.occurred_at.to_rfc3339(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(status: SubscriptionStatus, retry_attempt: u32) -> Subscription {
        Subscription {
            id: "s".to_string(),
            run_mode: RunMode::FromBeginning,
            status,
            position: SequenceNumber::ZERO,
            retry_attempt,
            error: None,
            last_saved_at: Utc::now(),
        }
    }

    #[test]
    fn names_round_trip() {
        for mode in [RunMode::FromBeginning, RunMode::FromNow, RunMode::Once] {
            assert_eq!(RunMode::parse(mode.as_str()), Some(mode));
        }
        for status in [
            SubscriptionStatus::New,
            SubscriptionStatus::Booting,
            SubscriptionStatus::Active,
            SubscriptionStatus::Detached,
            SubscriptionStatus::Error,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn failed_subscriptions_retry_within_budget() {
        assert!(subscription(SubscriptionStatus::Error, 2).wants_events(3));
        assert!(!subscription(SubscriptionStatus::Error, 3).wants_events(3));
        assert!(!subscription(SubscriptionStatus::Detached, 0).wants_events(3));
        assert!(subscription(SubscriptionStatus::New, 0).wants_events(0));
    }
}
