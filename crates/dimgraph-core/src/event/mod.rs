//! Domain events.
//!
//! Events are stored as `(type, payload, metadata)` triples in a stream of
//! the event store. This module owns the typed side: the [`EventType`]
//! catalog, typed payloads in [`data`], and the metadata written alongside
//! every event.
//!
//! # Wire shape
//!
//! ```text
//! {type, data, metadata, streamId, streamVersion, timestamp, sequenceNumber}
//! ```
//!
//! Consumers decode through [`decode`], which maps unknown event types to
//! `Ok(None)` so they can be skipped.

pub mod data;
pub mod types;

pub use data::{DataParseError, EventData, InterdimensionalSibling};
pub use types::{EventType, UnknownEventType};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{EventEnvelope, NewEvent};

/// Metadata stored next to an event.
///
/// The first event of a command's batch carries the command that produced
/// it, so a workspace rebase can re-run the command against a new base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_payload: Option<serde_json::Value>,
    /// Keys written by other producers are kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EventMetadata {
    #[must_use]
    pub fn for_command(command_type: &str, payload: serde_json::Value) -> Self {
        Self {
            command_type: Some(command_type.to_string()),
            command_payload: Some(payload),
            extra: BTreeMap::new(),
        }
    }

    /// Lenient parse: metadata that does not fit is treated as empty.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        Self::deserialize(json).unwrap_or_default()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Build a storable event from typed data.
///
/// # Errors
///
/// Returns the serialization error if the payload cannot be encoded.
pub fn to_new_event(
    data: &EventData,
    metadata: &EventMetadata,
) -> Result<NewEvent, serde_json::Error> {
    Ok(NewEvent {
        event_type: data.event_type().as_str().to_string(),
        payload: data.to_json()?,
        metadata: metadata.to_json(),
    })
}

/// Decode a stored event.
///
/// Returns `Ok(None)` for event types this build does not know.
///
/// # Errors
///
/// Returns [`DataParseError`] when a known event type carries a payload that
/// does not match its schema.
pub fn decode(envelope: &EventEnvelope) -> Result<Option<EventData>, DataParseError> {
    let Ok(event_type) = envelope.event_type.parse::<EventType>() else {
        tracing::debug!(
            sequence_number = envelope.sequence_number.value(),
            event_type = %envelope.event_type,
            "skipping unknown event type"
        );
        return Ok(None);
    };
    EventData::deserialize_for(event_type, &envelope.payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_keeps_unknown_keys() {
        let json = serde_json::json!({
            "commandType": "SetNodeProperties",
            "commandPayload": {"a": 1},
            "initiatingUserId": "editor"
        });
        let meta = EventMetadata::from_json(&json);
        assert_eq!(meta.command_type.as_deref(), Some("SetNodeProperties"));
        assert_eq!(meta.extra.get("initiatingUserId"), Some(&serde_json::json!("editor")));
        assert_eq!(meta.to_json(), json);
    }

    #[test]
    fn empty_metadata_serializes_to_empty_object() {
        assert_eq!(EventMetadata::default().to_json(), serde_json::json!({}));
        assert_eq!(
            EventMetadata::from_json(&serde_json::Value::Null),
            EventMetadata::default()
        );
    }
}
