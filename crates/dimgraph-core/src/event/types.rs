//! Event type catalog.
//!
//! The string form is the name stored in the event log's `type` column.
//! Unknown names are not an error at read time: consumers skip them so newer
//! writers never break older projections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ContentStreamWasCreated,
    ContentStreamWasForked,
    ContentStreamWasClosed,
    ContentStreamWasReopened,
    ContentStreamWasRemoved,

    RootWorkspaceWasCreated,
    WorkspaceWasCreated,
    WorkspaceWasPublished,
    WorkspaceWasPartiallyPublished,
    WorkspaceWasDiscarded,
    WorkspaceWasPartiallyDiscarded,
    WorkspaceWasRebased,
    WorkspaceWasRemoved,

    RootNodeAggregateWithNodeWasCreated,
    RootNodeAggregateDimensionsWereUpdated,
    NodeAggregateWithNodeWasCreated,
    NodePropertiesWereSet,
    NodeReferencesWereSet,
    NodeAggregateNameWasChanged,
    NodeSpecializationVariantWasCreated,
    NodeGeneralizationVariantWasCreated,
    NodePeerVariantWasCreated,
    NodeAggregateWasMoved,
    NodeAggregateWasRemoved,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType {
    pub raw: String,
}

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.raw)
    }
}

impl std::error::Error for UnknownEventType {}

impl EventType {
    pub const ALL: [Self; 24] = [
        Self::ContentStreamWasCreated,
        Self::ContentStreamWasForked,
        Self::ContentStreamWasClosed,
        Self::ContentStreamWasReopened,
        Self::ContentStreamWasRemoved,
        Self::RootWorkspaceWasCreated,
        Self::WorkspaceWasCreated,
        Self::WorkspaceWasPublished,
        Self::WorkspaceWasPartiallyPublished,
        Self::WorkspaceWasDiscarded,
        Self::WorkspaceWasPartiallyDiscarded,
        Self::WorkspaceWasRebased,
        Self::WorkspaceWasRemoved,
        Self::RootNodeAggregateWithNodeWasCreated,
        Self::RootNodeAggregateDimensionsWereUpdated,
        Self::NodeAggregateWithNodeWasCreated,
        Self::NodePropertiesWereSet,
        Self::NodeReferencesWereSet,
        Self::NodeAggregateNameWasChanged,
        Self::NodeSpecializationVariantWasCreated,
        Self::NodeGeneralizationVariantWasCreated,
        Self::NodePeerVariantWasCreated,
        Self::NodeAggregateWasMoved,
        Self::NodeAggregateWasRemoved,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContentStreamWasCreated => "ContentStreamWasCreated",
            Self::ContentStreamWasForked => "ContentStreamWasForked",
            Self::ContentStreamWasClosed => "ContentStreamWasClosed",
            Self::ContentStreamWasReopened => "ContentStreamWasReopened",
            Self::ContentStreamWasRemoved => "ContentStreamWasRemoved",
            Self::RootWorkspaceWasCreated => "RootWorkspaceWasCreated",
            Self::WorkspaceWasCreated => "WorkspaceWasCreated",
            Self::WorkspaceWasPublished => "WorkspaceWasPublished",
            Self::WorkspaceWasPartiallyPublished => "WorkspaceWasPartiallyPublished",
            Self::WorkspaceWasDiscarded => "WorkspaceWasDiscarded",
            Self::WorkspaceWasPartiallyDiscarded => "WorkspaceWasPartiallyDiscarded",
            Self::WorkspaceWasRebased => "WorkspaceWasRebased",
            Self::WorkspaceWasRemoved => "WorkspaceWasRemoved",
            Self::RootNodeAggregateWithNodeWasCreated => "RootNodeAggregateWithNodeWasCreated",
            Self::RootNodeAggregateDimensionsWereUpdated => {
                "RootNodeAggregateDimensionsWereUpdated"
            }
            Self::NodeAggregateWithNodeWasCreated => "NodeAggregateWithNodeWasCreated",
            Self::NodePropertiesWereSet => "NodePropertiesWereSet",
            Self::NodeReferencesWereSet => "NodeReferencesWereSet",
            Self::NodeAggregateNameWasChanged => "NodeAggregateNameWasChanged",
            Self::NodeSpecializationVariantWasCreated => "NodeSpecializationVariantWasCreated",
            Self::NodeGeneralizationVariantWasCreated => "NodeGeneralizationVariantWasCreated",
            Self::NodePeerVariantWasCreated => "NodePeerVariantWasCreated",
            Self::NodeAggregateWasMoved => "NodeAggregateWasMoved",
            Self::NodeAggregateWasRemoved => "NodeAggregateWasRemoved",
        }
    }

    /// Events that change the content of a stream and can be replayed onto
    /// another stream (publish, rebase).
    #[must_use]
    pub const fn is_node_event(self) -> bool {
        matches!(
            self,
            Self::RootNodeAggregateWithNodeWasCreated
                | Self::RootNodeAggregateDimensionsWereUpdated
                | Self::NodeAggregateWithNodeWasCreated
                | Self::NodePropertiesWereSet
                | Self::NodeReferencesWereSet
                | Self::NodeAggregateNameWasChanged
                | Self::NodeSpecializationVariantWasCreated
                | Self::NodeGeneralizationVariantWasCreated
                | Self::NodePeerVariantWasCreated
                | Self::NodeAggregateWasMoved
                | Self::NodeAggregateWasRemoved
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType { raw: s.to_string() })
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
