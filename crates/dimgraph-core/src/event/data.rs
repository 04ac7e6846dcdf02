//! Typed event payloads.
//!
//! Payloads serialize to camelCase JSON objects. The event type is stored
//! next to the payload rather than inside it, so decoding is driven by
//! [`EventData::deserialize_for`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::EventType;
use crate::dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};
use crate::model::{
    ContentStreamId, ContentStreamState, NodeAggregateClassification, NodeAggregateId, NodeName,
    NodeTypeName, PropertyName, ReferenceName, SerializedPropertyValues, WorkspaceName,
};
use crate::store::Version;

// ---------------------------------------------------------------------------
// Shared value objects
// ---------------------------------------------------------------------------

/// Where a node goes in one covered point: before `node_aggregate_id`, or at
/// the end when it is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterdimensionalSibling {
    pub dimension_space_point: DimensionSpacePoint,
    pub node_aggregate_id: Option<NodeAggregateId>,
}

impl InterdimensionalSibling {
    #[must_use]
    pub const fn new(
        dimension_space_point: DimensionSpacePoint,
        node_aggregate_id: Option<NodeAggregateId>,
    ) -> Self {
        Self {
            dimension_space_point,
            node_aggregate_id,
        }
    }
}

/// The points a sibling list covers.
#[must_use]
pub fn covered_by(siblings: &[InterdimensionalSibling]) -> DimensionSpacePointSet {
    siblings
        .iter()
        .map(|s| s.dimension_space_point.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNodeReference {
    pub target_node_aggregate_id: NodeAggregateId,
    #[serde(default, skip_serializing_if = "SerializedPropertyValues::is_empty")]
    pub properties: SerializedPropertyValues,
}

// ---------------------------------------------------------------------------
// Content stream payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStreamWasCreated {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStreamWasForked {
    pub new_content_stream_id: ContentStreamId,
    pub source_content_stream_id: ContentStreamId,
    pub version_of_source_content_stream: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStreamWasClosed {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStreamWasReopened {
    pub content_stream_id: ContentStreamId,
    pub previous_state: ContentStreamState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStreamWasRemoved {
    pub content_stream_id: ContentStreamId,
}

// ---------------------------------------------------------------------------
// Workspace payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootWorkspaceWasCreated {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasCreated {
    pub workspace_name: WorkspaceName,
    pub base_workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasPublished {
    pub source_workspace_name: WorkspaceName,
    pub target_workspace_name: WorkspaceName,
    pub new_source_content_stream_id: ContentStreamId,
    pub previous_source_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasPartiallyPublished {
    pub source_workspace_name: WorkspaceName,
    pub target_workspace_name: WorkspaceName,
    pub new_source_content_stream_id: ContentStreamId,
    pub previous_source_content_stream_id: ContentStreamId,
    pub published_nodes: BTreeSet<NodeAggregateId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasDiscarded {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasPartiallyDiscarded {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,
    pub discarded_nodes: BTreeSet<NodeAggregateId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasRebased {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,
    /// Commands dropped by a forced rebase, by their position in the old stream.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_commands: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWasRemoved {
    pub workspace_name: WorkspaceName,
}

// ---------------------------------------------------------------------------
// Node payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootNodeAggregateWithNodeWasCreated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub covered_dimension_space_points: DimensionSpacePointSet,
    pub node_aggregate_classification: NodeAggregateClassification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootNodeAggregateDimensionsWereUpdated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub covered_dimension_space_points: DimensionSpacePointSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWithNodeWasCreated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub succeeding_siblings_for_coverage: Vec<InterdimensionalSibling>,
    pub parent_node_aggregate_id: NodeAggregateId,
    pub node_name: Option<NodeName>,
    pub initial_property_values: SerializedPropertyValues,
    pub node_aggregate_classification: NodeAggregateClassification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePropertiesWereSet {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub affected_dimension_space_points: DimensionSpacePointSet,
    pub property_values: SerializedPropertyValues,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub properties_to_unset: BTreeSet<PropertyName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReferencesWereSet {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub affected_source_origin_dimension_space_points: BTreeSet<OriginDimensionSpacePoint>,
    pub reference_name: ReferenceName,
    pub references: Vec<SerializedNodeReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateNameWasChanged {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub new_node_name: NodeName,
}

/// Payload shared by the specialization, generalization and peer variant
/// events; the event type says which relation `target_origin` has to
/// `source_origin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVariantWasCreated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub source_origin: OriginDimensionSpacePoint,
    pub target_origin: OriginDimensionSpacePoint,
    /// Points the new variant covers, with its position in each.
    pub variant_succeeding_siblings: Vec<InterdimensionalSibling>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWasMoved {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub new_parent_node_aggregate_id: Option<NodeAggregateId>,
    pub succeeding_siblings_for_coverage: Vec<InterdimensionalSibling>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWasRemoved {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub affected_occupied_dimension_space_points: BTreeSet<OriginDimensionSpacePoint>,
    pub affected_covered_dimension_space_points: DimensionSpacePointSet,
}

// ---------------------------------------------------------------------------
// EventData
// ---------------------------------------------------------------------------

/// A decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    ContentStreamWasCreated(ContentStreamWasCreated),
    ContentStreamWasForked(ContentStreamWasForked),
    ContentStreamWasClosed(ContentStreamWasClosed),
    ContentStreamWasReopened(ContentStreamWasReopened),
    ContentStreamWasRemoved(ContentStreamWasRemoved),

    RootWorkspaceWasCreated(RootWorkspaceWasCreated),
    WorkspaceWasCreated(WorkspaceWasCreated),
    WorkspaceWasPublished(WorkspaceWasPublished),
    WorkspaceWasPartiallyPublished(WorkspaceWasPartiallyPublished),
    WorkspaceWasDiscarded(WorkspaceWasDiscarded),
    WorkspaceWasPartiallyDiscarded(WorkspaceWasPartiallyDiscarded),
    WorkspaceWasRebased(WorkspaceWasRebased),
    WorkspaceWasRemoved(WorkspaceWasRemoved),

    RootNodeAggregateWithNodeWasCreated(RootNodeAggregateWithNodeWasCreated),
    RootNodeAggregateDimensionsWereUpdated(RootNodeAggregateDimensionsWereUpdated),
    NodeAggregateWithNodeWasCreated(NodeAggregateWithNodeWasCreated),
    NodePropertiesWereSet(NodePropertiesWereSet),
    NodeReferencesWereSet(NodeReferencesWereSet),
    NodeAggregateNameWasChanged(NodeAggregateNameWasChanged),
    NodeSpecializationVariantWasCreated(NodeVariantWasCreated),
    NodeGeneralizationVariantWasCreated(NodeVariantWasCreated),
    NodePeerVariantWasCreated(NodeVariantWasCreated),
    NodeAggregateWasMoved(NodeAggregateWasMoved),
    NodeAggregateWasRemoved(NodeAggregateWasRemoved),
}

/// Error returned when a payload does not match its event type.
#[derive(Debug, thiserror::Error)]
#[error("invalid {event_type} payload: {source}")]
pub struct DataParseError {
    pub event_type: EventType,
    #[source]
    pub source: serde_json::Error,
}

macro_rules! for_each_variant {
    ($self:expr, $payload:ident => $body:expr) => {
        match $self {
            EventData::ContentStreamWasCreated($payload) => $body,
            EventData::ContentStreamWasForked($payload) => $body,
            EventData::ContentStreamWasClosed($payload) => $body,
            EventData::ContentStreamWasReopened($payload) => $body,
            EventData::ContentStreamWasRemoved($payload) => $body,
            EventData::RootWorkspaceWasCreated($payload) => $body,
            EventData::WorkspaceWasCreated($payload) => $body,
            EventData::WorkspaceWasPublished($payload) => $body,
            EventData::WorkspaceWasPartiallyPublished($payload) => $body,
            EventData::WorkspaceWasDiscarded($payload) => $body,
            EventData::WorkspaceWasPartiallyDiscarded($payload) => $body,
            EventData::WorkspaceWasRebased($payload) => $body,
            EventData::WorkspaceWasRemoved($payload) => $body,
            EventData::RootNodeAggregateWithNodeWasCreated($payload) => $body,
            EventData::RootNodeAggregateDimensionsWereUpdated($payload) => $body,
            EventData::NodeAggregateWithNodeWasCreated($payload) => $body,
            EventData::NodePropertiesWereSet($payload) => $body,
            EventData::NodeReferencesWereSet($payload) => $body,
            EventData::NodeAggregateNameWasChanged($payload) => $body,
            EventData::NodeSpecializationVariantWasCreated($payload)
            | EventData::NodeGeneralizationVariantWasCreated($payload)
            | EventData::NodePeerVariantWasCreated($payload) => $body,
            EventData::NodeAggregateWasMoved($payload) => $body,
            EventData::NodeAggregateWasRemoved($payload) => $body,
        }
    };
}

impl EventData {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::ContentStreamWasCreated(_) => EventType::ContentStreamWasCreated,
            Self::ContentStreamWasForked(_) => EventType::ContentStreamWasForked,
            Self::ContentStreamWasClosed(_) => EventType::ContentStreamWasClosed,
            Self::ContentStreamWasReopened(_) => EventType::ContentStreamWasReopened,
            Self::ContentStreamWasRemoved(_) => EventType::ContentStreamWasRemoved,
            Self::RootWorkspaceWasCreated(_) => EventType::RootWorkspaceWasCreated,
            Self::WorkspaceWasCreated(_) => EventType::WorkspaceWasCreated,
            Self::WorkspaceWasPublished(_) => EventType::WorkspaceWasPublished,
            Self::WorkspaceWasPartiallyPublished(_) => EventType::WorkspaceWasPartiallyPublished,
            Self::WorkspaceWasDiscarded(_) => EventType::WorkspaceWasDiscarded,
            Self::WorkspaceWasPartiallyDiscarded(_) => EventType::WorkspaceWasPartiallyDiscarded,
            Self::WorkspaceWasRebased(_) => EventType::WorkspaceWasRebased,
            Self::WorkspaceWasRemoved(_) => EventType::WorkspaceWasRemoved,
            Self::RootNodeAggregateWithNodeWasCreated(_) => {
                EventType::RootNodeAggregateWithNodeWasCreated
            }
            Self::RootNodeAggregateDimensionsWereUpdated(_) => {
                EventType::RootNodeAggregateDimensionsWereUpdated
            }
            Self::NodeAggregateWithNodeWasCreated(_) => EventType::NodeAggregateWithNodeWasCreated,
            Self::NodePropertiesWereSet(_) => EventType::NodePropertiesWereSet,
            Self::NodeReferencesWereSet(_) => EventType::NodeReferencesWereSet,
            Self::NodeAggregateNameWasChanged(_) => EventType::NodeAggregateNameWasChanged,
            Self::NodeSpecializationVariantWasCreated(_) => {
                EventType::NodeSpecializationVariantWasCreated
            }
            Self::NodeGeneralizationVariantWasCreated(_) => {
                EventType::NodeGeneralizationVariantWasCreated
            }
            Self::NodePeerVariantWasCreated(_) => EventType::NodePeerVariantWasCreated,
            Self::NodeAggregateWasMoved(_) => EventType::NodeAggregateWasMoved,
            Self::NodeAggregateWasRemoved(_) => EventType::NodeAggregateWasRemoved,
        }
    }

    /// Decode a JSON payload stored under `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DataParseError`] if the payload does not match the schema
    /// of `event_type`.
    pub fn deserialize_for(
        event_type: EventType,
        json: &serde_json::Value,
    ) -> Result<Self, DataParseError> {
        fn parse<T: serde::de::DeserializeOwned>(
            json: &serde_json::Value,
        ) -> Result<T, serde_json::Error> {
            T::deserialize(json)
        }

        let result = match event_type {
            EventType::ContentStreamWasCreated => parse(json).map(Self::ContentStreamWasCreated),
            EventType::ContentStreamWasForked => parse(json).map(Self::ContentStreamWasForked),
            EventType::ContentStreamWasClosed => parse(json).map(Self::ContentStreamWasClosed),
            EventType::ContentStreamWasReopened => parse(json).map(Self::ContentStreamWasReopened),
            EventType::ContentStreamWasRemoved => parse(json).map(Self::ContentStreamWasRemoved),
            EventType::RootWorkspaceWasCreated => parse(json).map(Self::RootWorkspaceWasCreated),
            EventType::WorkspaceWasCreated => parse(json).map(Self::WorkspaceWasCreated),
            EventType::WorkspaceWasPublished => parse(json).map(Self::WorkspaceWasPublished),
            EventType::WorkspaceWasPartiallyPublished => {
                parse(json).map(Self::WorkspaceWasPartiallyPublished)
            }
            EventType::WorkspaceWasDiscarded => parse(json).map(Self::WorkspaceWasDiscarded),
            EventType::WorkspaceWasPartiallyDiscarded => {
                parse(json).map(Self::WorkspaceWasPartiallyDiscarded)
            }
            EventType::WorkspaceWasRebased => parse(json).map(Self::WorkspaceWasRebased),
            EventType::WorkspaceWasRemoved => parse(json).map(Self::WorkspaceWasRemoved),
            EventType::RootNodeAggregateWithNodeWasCreated => {
                parse(json).map(Self::RootNodeAggregateWithNodeWasCreated)
            }
            EventType::RootNodeAggregateDimensionsWereUpdated => {
                parse(json).map(Self::RootNodeAggregateDimensionsWereUpdated)
            }
            EventType::NodeAggregateWithNodeWasCreated => {
                parse(json).map(Self::NodeAggregateWithNodeWasCreated)
            }
            EventType::NodePropertiesWereSet => parse(json).map(Self::NodePropertiesWereSet),
            EventType::NodeReferencesWereSet => parse(json).map(Self::NodeReferencesWereSet),
            EventType::NodeAggregateNameWasChanged => {
                parse(json).map(Self::NodeAggregateNameWasChanged)
            }
            EventType::NodeSpecializationVariantWasCreated => {
                parse(json).map(Self::NodeSpecializationVariantWasCreated)
            }
            EventType::NodeGeneralizationVariantWasCreated => {
                parse(json).map(Self::NodeGeneralizationVariantWasCreated)
            }
            EventType::NodePeerVariantWasCreated => {
                parse(json).map(Self::NodePeerVariantWasCreated)
            }
            EventType::NodeAggregateWasMoved => parse(json).map(Self::NodeAggregateWasMoved),
            EventType::NodeAggregateWasRemoved => parse(json).map(Self::NodeAggregateWasRemoved),
        };

        result.map_err(|source| DataParseError { event_type, source })
    }

    /// Encode the payload as a JSON value.
    ///
    /// # Errors
    ///
    /// Only fails if a payload contains a map with non-string keys, which
    /// none of the payload types do.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        for_each_variant!(self, payload => serde_json::to_value(payload))
    }

    /// The content stream a node or content stream event belongs to.
    #[must_use]
    pub const fn content_stream_id(&self) -> Option<&ContentStreamId> {
        match self {
            Self::ContentStreamWasCreated(e) => Some(&e.content_stream_id),
            Self::ContentStreamWasForked(e) => Some(&e.new_content_stream_id),
            Self::ContentStreamWasClosed(e) => Some(&e.content_stream_id),
            Self::ContentStreamWasReopened(e) => Some(&e.content_stream_id),
            Self::ContentStreamWasRemoved(e) => Some(&e.content_stream_id),
            Self::RootNodeAggregateWithNodeWasCreated(e) => Some(&e.content_stream_id),
            Self::RootNodeAggregateDimensionsWereUpdated(e) => Some(&e.content_stream_id),
            Self::NodeAggregateWithNodeWasCreated(e) => Some(&e.content_stream_id),
            Self::NodePropertiesWereSet(e) => Some(&e.content_stream_id),
            Self::NodeReferencesWereSet(e) => Some(&e.content_stream_id),
            Self::NodeAggregateNameWasChanged(e) => Some(&e.content_stream_id),
            Self::NodeSpecializationVariantWasCreated(e)
            | Self::NodeGeneralizationVariantWasCreated(e)
            | Self::NodePeerVariantWasCreated(e) => Some(&e.content_stream_id),
            Self::NodeAggregateWasMoved(e) => Some(&e.content_stream_id),
            Self::NodeAggregateWasRemoved(e) => Some(&e.content_stream_id),
            Self::RootWorkspaceWasCreated(_)
            | Self::WorkspaceWasCreated(_)
            | Self::WorkspaceWasPublished(_)
            | Self::WorkspaceWasPartiallyPublished(_)
            | Self::WorkspaceWasDiscarded(_)
            | Self::WorkspaceWasPartiallyDiscarded(_)
            | Self::WorkspaceWasRebased(_)
            | Self::WorkspaceWasRemoved(_) => None,
        }
    }

    /// The node aggregate a node event is about.
    #[must_use]
    pub const fn node_aggregate_id(&self) -> Option<&NodeAggregateId> {
        match self {
            Self::RootNodeAggregateWithNodeWasCreated(e) => Some(&e.node_aggregate_id),
            Self::RootNodeAggregateDimensionsWereUpdated(e) => Some(&e.node_aggregate_id),
            Self::NodeAggregateWithNodeWasCreated(e) => Some(&e.node_aggregate_id),
            Self::NodePropertiesWereSet(e) => Some(&e.node_aggregate_id),
            Self::NodeReferencesWereSet(e) => Some(&e.node_aggregate_id),
            Self::NodeAggregateNameWasChanged(e) => Some(&e.node_aggregate_id),
            Self::NodeSpecializationVariantWasCreated(e)
            | Self::NodeGeneralizationVariantWasCreated(e)
            | Self::NodePeerVariantWasCreated(e) => Some(&e.node_aggregate_id),
            Self::NodeAggregateWasMoved(e) => Some(&e.node_aggregate_id),
            Self::NodeAggregateWasRemoved(e) => Some(&e.node_aggregate_id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_node_event(&self) -> bool {
        self.event_type().is_node_event()
    }

    /// A copy of a node event retargeted to `content_stream_id`.
    ///
    /// Used when publishing: the events of a fork are appended to the base
    /// stream unchanged except for the stream they belong to. Events that are
    /// not node events are returned unchanged.
    #[must_use]
    pub fn create_copy_for_content_stream(&self, content_stream_id: &ContentStreamId) -> Self {
        let mut copy = self.clone();
        let target = match &mut copy {
            Self::RootNodeAggregateWithNodeWasCreated(e) => &mut e.content_stream_id,
            Self::RootNodeAggregateDimensionsWereUpdated(e) => &mut e.content_stream_id,
            Self::NodeAggregateWithNodeWasCreated(e) => &mut e.content_stream_id,
            Self::NodePropertiesWereSet(e) => &mut e.content_stream_id,
            Self::NodeReferencesWereSet(e) => &mut e.content_stream_id,
            Self::NodeAggregateNameWasChanged(e) => &mut e.content_stream_id,
            Self::NodeSpecializationVariantWasCreated(e)
            | Self::NodeGeneralizationVariantWasCreated(e)
            | Self::NodePeerVariantWasCreated(e) => &mut e.content_stream_id,
            Self::NodeAggregateWasMoved(e) => &mut e.content_stream_id,
            Self::NodeAggregateWasRemoved(e) => &mut e.content_stream_id,
            _ => return copy,
        };
        *target = content_stream_id.clone();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(id: &str) -> ContentStreamId {
        ContentStreamId::new_unchecked(id)
    }

    fn name_changed() -> EventData {
        EventData::NodeAggregateNameWasChanged(NodeAggregateNameWasChanged {
            content_stream_id: cs("cs-1"),
            node_aggregate_id: NodeAggregateId::new_unchecked("page"),
            new_node_name: NodeName::new("about"),
        })
    }

    #[test]
    fn payload_uses_camel_case() {
        let json = name_changed().to_json().expect("encode");
        assert_eq!(json["contentStreamId"], "cs-1");
        assert_eq!(json["newNodeName"], "about");
    }

    #[test]
    fn deserialize_for_uses_external_type() {
        let event = name_changed();
        let json = event.to_json().expect("encode");
        let back = EventData::deserialize_for(event.event_type(), &json).expect("decode");
        assert_eq!(back, event);

        let err = EventData::deserialize_for(EventType::ContentStreamWasForked, &json)
            .expect_err("wrong schema");
        assert_eq!(err.event_type, EventType::ContentStreamWasForked);
    }

    #[test]
    fn copy_for_content_stream_only_changes_the_stream() {
        let copy = name_changed().create_copy_for_content_stream(&cs("live-cs"));
        assert_eq!(copy.content_stream_id(), Some(&cs("live-cs")));
        assert_eq!(copy.node_aggregate_id().map(NodeAggregateId::as_str), Some("page"));

        let forked = EventData::ContentStreamWasForked(ContentStreamWasForked {
            new_content_stream_id: cs("a"),
            source_content_stream_id: cs("b"),
            version_of_source_content_stream: Version::new(3),
        });
        assert_eq!(forked.create_copy_for_content_stream(&cs("c")), forked);
    }

    #[test]
    fn variant_events_share_one_payload() {
        let payload = NodeVariantWasCreated {
            content_stream_id: cs("cs-1"),
            node_aggregate_id: NodeAggregateId::new_unchecked("page"),
            source_origin: OriginDimensionSpacePoint::from_pairs([("language", "en")]),
            target_origin: OriginDimensionSpacePoint::from_pairs([("language", "de")]),
            variant_succeeding_siblings: vec![],
        };
        let json = serde_json::to_value(&payload).expect("encode");
        for t in [
            EventType::NodeSpecializationVariantWasCreated,
            EventType::NodeGeneralizationVariantWasCreated,
            EventType::NodePeerVariantWasCreated,
        ] {
            let decoded = EventData::deserialize_for(t, &json).expect("decode");
            assert_eq!(decoded.event_type(), t);
        }
    }
}
