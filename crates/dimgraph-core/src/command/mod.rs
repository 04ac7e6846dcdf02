//! Commands and the decide step.
//!
//! # Overview
//!
//! A command is validated against the current projections and, if every
//! precondition holds, turned into an [`EventsToPublish`] batch for exactly
//! one stream. Deciding is a pure function of the command, the
//! [`ContentModel`] and whatever the [`ContentStreamLookup`] returns; the
//! caller appends the batch and retries the whole decision when the append
//! loses a race.
//!
//! Handlers live in one module per feature and share the precondition
//! helpers in [`checks`].

pub mod checks;
pub mod content_stream;
pub mod error;
pub mod node_creation;
pub mod node_modification;
pub mod node_move;
pub mod node_removal;
pub mod node_variation;

pub use error::{CommandError, CommandFailure, ErrorKind};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePoint, OriginDimensionSpacePoint};
use crate::event::{EventData, EventMetadata, to_new_event};
use crate::graph::ContentGraph;
use crate::model::{
    ContentStreamId, ContentStreamState, NodeAggregateId, NodeName, NodePath, NodeTypeName,
    PropertyValuesToWrite, ReferenceName, SerializedPropertyValues,
};
use crate::projection::content_stream::ContentStreamRecord;
use crate::store::{ExpectedVersion, NewEvent, StreamName, Version};

// ---------------------------------------------------------------------------
// Command payloads
// ---------------------------------------------------------------------------

/// Ids to use for tethered descendants, by their path below the created node.
/// Descendants without an entry get a derived id.
pub type NodeAggregateIdsByNodePaths = BTreeMap<NodePath, NodeAggregateId>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRootNodeAggregateWithNode {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tethered_descendant_node_aggregate_ids: NodeAggregateIdsByNodePaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRootNodeAggregateDimensions {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeAggregateWithNode {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub parent_node_aggregate_id: NodeAggregateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeding_sibling_node_aggregate_id: Option<NodeAggregateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<NodeName>,
    #[serde(default)]
    pub initial_property_values: SerializedPropertyValues,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tethered_descendant_node_aggregate_ids: NodeAggregateIdsByNodePaths,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetNodeProperties {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    /// `null` unsets the property.
    pub property_values: PropertyValuesToWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReferenceToWrite {
    pub target_node_aggregate_id: NodeAggregateId,
    #[serde(default, skip_serializing_if = "SerializedPropertyValues::is_empty")]
    pub properties: SerializedPropertyValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetNodeReferences {
    pub content_stream_id: ContentStreamId,
    pub source_node_aggregate_id: NodeAggregateId,
    pub source_origin_dimension_space_point: OriginDimensionSpacePoint,
    pub reference_name: ReferenceName,
    pub references: Vec<NodeReferenceToWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNodeAggregateName {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub new_node_name: NodeName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeVariant {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub source_origin: OriginDimensionSpacePoint,
    pub target_origin: OriginDimensionSpacePoint,
}

/// Which covered points a move applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationDistributionStrategy {
    /// Only the given point.
    Scatter,
    /// The given point and its covered specializations.
    GatherSpecializations,
    /// Every covered point.
    #[default]
    GatherAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNodeAggregate {
    pub content_stream_id: ContentStreamId,
    pub dimension_space_point: DimensionSpacePoint,
    pub node_aggregate_id: NodeAggregateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_parent_node_aggregate_id: Option<NodeAggregateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_preceding_sibling_node_aggregate_id: Option<NodeAggregateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_succeeding_sibling_node_aggregate_id: Option<NodeAggregateId>,
    #[serde(default)]
    pub relation_distribution_strategy: RelationDistributionStrategy,
}

/// Which variants a removal reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeVariantSelectionStrategy {
    #[default]
    AllVariants,
    /// The covered point and its specializations.
    AllSpecializations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveNodeAggregate {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub covered_dimension_space_point: DimensionSpacePoint,
    #[serde(default)]
    pub node_variant_selection_strategy: NodeVariantSelectionStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentStream {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkContentStream {
    pub content_stream_id: ContentStreamId,
    pub source_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseContentStream {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReopenContentStream {
    pub content_stream_id: ContentStreamId,
    pub previous_state: ContentStreamState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveContentStream {
    pub content_stream_id: ContentStreamId,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateRootNodeAggregateWithNode(CreateRootNodeAggregateWithNode),
    UpdateRootNodeAggregateDimensions(UpdateRootNodeAggregateDimensions),
    CreateNodeAggregateWithNode(CreateNodeAggregateWithNode),
    SetNodeProperties(SetNodeProperties),
    SetNodeReferences(SetNodeReferences),
    ChangeNodeAggregateName(ChangeNodeAggregateName),
    CreateNodeVariant(CreateNodeVariant),
    MoveNodeAggregate(MoveNodeAggregate),
    RemoveNodeAggregate(RemoveNodeAggregate),
    CreateContentStream(CreateContentStream),
    ForkContentStream(ForkContentStream),
    CloseContentStream(CloseContentStream),
    ReopenContentStream(ReopenContentStream),
    RemoveContentStream(RemoveContentStream),
}

macro_rules! for_each_command {
    ($self:expr, $payload:ident => $body:expr) => {
        match $self {
            Command::CreateRootNodeAggregateWithNode($payload) => $body,
            Command::UpdateRootNodeAggregateDimensions($payload) => $body,
            Command::CreateNodeAggregateWithNode($payload) => $body,
            Command::SetNodeProperties($payload) => $body,
            Command::SetNodeReferences($payload) => $body,
            Command::ChangeNodeAggregateName($payload) => $body,
            Command::CreateNodeVariant($payload) => $body,
            Command::MoveNodeAggregate($payload) => $body,
            Command::RemoveNodeAggregate($payload) => $body,
            Command::CreateContentStream($payload) => $body,
            Command::ForkContentStream($payload) => $body,
            Command::CloseContentStream($payload) => $body,
            Command::ReopenContentStream($payload) => $body,
            Command::RemoveContentStream($payload) => $body,
        }
    };
}

impl Command {
    /// Stable command name, stored as `commandType` in event metadata.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRootNodeAggregateWithNode(_) => "CreateRootNodeAggregateWithNode",
            Self::UpdateRootNodeAggregateDimensions(_) => "UpdateRootNodeAggregateDimensions",
            Self::CreateNodeAggregateWithNode(_) => "CreateNodeAggregateWithNode",
            Self::SetNodeProperties(_) => "SetNodeProperties",
            Self::SetNodeReferences(_) => "SetNodeReferences",
            Self::ChangeNodeAggregateName(_) => "ChangeNodeAggregateName",
            Self::CreateNodeVariant(_) => "CreateNodeVariant",
            Self::MoveNodeAggregate(_) => "MoveNodeAggregate",
            Self::RemoveNodeAggregate(_) => "RemoveNodeAggregate",
            Self::CreateContentStream(_) => "CreateContentStream",
            Self::ForkContentStream(_) => "ForkContentStream",
            Self::CloseContentStream(_) => "CloseContentStream",
            Self::ReopenContentStream(_) => "ReopenContentStream",
            Self::RemoveContentStream(_) => "RemoveContentStream",
        }
    }

    /// camelCase JSON payload, stored as `commandPayload`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error; none of the payloads can fail.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        for_each_command!(self, payload => serde_json::to_value(payload))
    }

    /// Inverse of [`Self::name`] + [`Self::to_payload`].
    ///
    /// # Errors
    ///
    /// [`CommandError::UnknownCommand`] for an unknown name,
    /// [`CommandError::InvalidCommandPayload`] if the payload does not match.
    pub fn from_payload(name: &str, payload: &serde_json::Value) -> Result<Self, CommandError> {
        fn parse<T: serde::de::DeserializeOwned>(
            name: &str,
            payload: &serde_json::Value,
        ) -> Result<T, CommandError> {
            T::deserialize(payload).map_err(|e| CommandError::InvalidCommandPayload {
                command: name.to_string(),
                reason: e.to_string(),
            })
        }

        Ok(match name {
            "CreateRootNodeAggregateWithNode" => {
                Self::CreateRootNodeAggregateWithNode(parse(name, payload)?)
            }
            "UpdateRootNodeAggregateDimensions" => {
                Self::UpdateRootNodeAggregateDimensions(parse(name, payload)?)
            }
            "CreateNodeAggregateWithNode" => {
                Self::CreateNodeAggregateWithNode(parse(name, payload)?)
            }
            "SetNodeProperties" => Self::SetNodeProperties(parse(name, payload)?),
            "SetNodeReferences" => Self::SetNodeReferences(parse(name, payload)?),
            "ChangeNodeAggregateName" => Self::ChangeNodeAggregateName(parse(name, payload)?),
            "CreateNodeVariant" => Self::CreateNodeVariant(parse(name, payload)?),
            "MoveNodeAggregate" => Self::MoveNodeAggregate(parse(name, payload)?),
            "RemoveNodeAggregate" => Self::RemoveNodeAggregate(parse(name, payload)?),
            "CreateContentStream" => Self::CreateContentStream(parse(name, payload)?),
            "ForkContentStream" => Self::ForkContentStream(parse(name, payload)?),
            "CloseContentStream" => Self::CloseContentStream(parse(name, payload)?),
            "ReopenContentStream" => Self::ReopenContentStream(parse(name, payload)?),
            "RemoveContentStream" => Self::RemoveContentStream(parse(name, payload)?),
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        })
    }

    /// The content stream the command writes to.
    #[must_use]
    pub const fn content_stream_id(&self) -> &ContentStreamId {
        for_each_command!(self, payload => &payload.content_stream_id)
    }

    /// Whether the command changes content and can be replayed onto another
    /// content stream.
    #[must_use]
    pub const fn is_rebasable(&self) -> bool {
        !matches!(
            self,
            Self::CreateContentStream(_)
                | Self::ForkContentStream(_)
                | Self::CloseContentStream(_)
                | Self::ReopenContentStream(_)
                | Self::RemoveContentStream(_)
        )
    }

    /// A copy targeting `content_stream_id`. Content stream commands are
    /// returned unchanged.
    #[must_use]
    pub fn with_content_stream(&self, content_stream_id: &ContentStreamId) -> Self {
        let mut copy = self.clone();
        if copy.is_rebasable() {
            for_each_command!(&mut copy, payload => {
                payload.content_stream_id = content_stream_id.clone();
            });
        }
        copy
    }

    /// The node aggregate a content command is about.
    #[must_use]
    pub const fn affected_node_aggregate_id(&self) -> Option<&NodeAggregateId> {
        match self {
            Self::CreateRootNodeAggregateWithNode(c) => Some(&c.node_aggregate_id),
            Self::UpdateRootNodeAggregateDimensions(c) => Some(&c.node_aggregate_id),
            Self::CreateNodeAggregateWithNode(c) => Some(&c.node_aggregate_id),
            Self::SetNodeProperties(c) => Some(&c.node_aggregate_id),
            Self::SetNodeReferences(c) => Some(&c.source_node_aggregate_id),
            Self::ChangeNodeAggregateName(c) => Some(&c.node_aggregate_id),
            Self::CreateNodeVariant(c) => Some(&c.node_aggregate_id),
            Self::MoveNodeAggregate(c) => Some(&c.node_aggregate_id),
            Self::RemoveNodeAggregate(c) => Some(&c.node_aggregate_id),
            Self::CreateContentStream(_)
            | Self::ForkContentStream(_)
            | Self::CloseContentStream(_)
            | Self::ReopenContentStream(_)
            | Self::RemoveContentStream(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Decide
// ---------------------------------------------------------------------------

/// Events a decision wants appended to one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsToPublish {
    pub stream: StreamName,
    pub events: Vec<EventData>,
    pub expected_version: ExpectedVersion,
    /// Written on the first event of the batch.
    pub metadata: EventMetadata,
}

impl EventsToPublish {
    #[must_use]
    pub fn new(
        stream: StreamName,
        events: Vec<EventData>,
        expected_version: ExpectedVersion,
    ) -> Self {
        Self {
            stream,
            events,
            expected_version,
            metadata: EventMetadata::default(),
        }
    }

    /// Node events for the content stream described by `record`, guarded by
    /// the version the decision was based on.
    #[must_use]
    pub fn for_content_stream(record: &ContentStreamRecord, events: Vec<EventData>) -> Self {
        Self::new(
            StreamName::for_content_stream(&record.id),
            events,
            ExpectedVersion::Exact(record.version),
        )
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Storable events; only the first carries the metadata.
    ///
    /// # Errors
    ///
    /// Returns the serialization error of a payload.
    pub fn to_new_events(&self) -> Result<Vec<NewEvent>, serde_json::Error> {
        let empty = EventMetadata::default();
        self.events
            .iter()
            .enumerate()
            .map(|(i, event)| to_new_event(event, if i == 0 { &self.metadata } else { &empty }))
            .collect()
    }
}

/// Read access to the projections a decision needs.
pub trait ContentStreamLookup {
    /// The registry entry of a content stream, removed ones included.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    fn content_stream(
        &self,
        id: &ContentStreamId,
    ) -> Result<Option<ContentStreamRecord>, CommandError>;

    /// Whether a workspace currently points at the content stream.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    fn is_in_use(&self, id: &ContentStreamId) -> Result<bool, CommandError>;

    /// The materialized graph of a content stream; empty if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    fn content_graph(&self, id: &ContentStreamId) -> Result<ContentGraph, CommandError>;

    /// The version of the content stream the materialized graph reflects;
    /// `None` if the graph has not been projected yet.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Projection`] if the read fails.
    fn content_graph_version(&self, id: &ContentStreamId) -> Result<Option<Version>, CommandError>;
}

/// Validate `command` and construct its events.
///
/// # Errors
///
/// Returns the [`CommandError`] of the first violated precondition.
pub fn decide(
    command: &Command,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let decided = match command {
        Command::CreateRootNodeAggregateWithNode(c) => node_creation::create_root(c, model, lookup),
        Command::UpdateRootNodeAggregateDimensions(c) => {
            node_creation::update_root_dimensions(c, model, lookup)
        }
        Command::CreateNodeAggregateWithNode(c) => node_creation::create_node(c, model, lookup),
        Command::SetNodeProperties(c) => node_modification::set_properties(c, model, lookup),
        Command::SetNodeReferences(c) => node_modification::set_references(c, model, lookup),
        Command::ChangeNodeAggregateName(c) => node_modification::change_name(c, model, lookup),
        Command::CreateNodeVariant(c) => node_variation::create_variant(c, model, lookup),
        Command::MoveNodeAggregate(c) => node_move::move_aggregate(c, model, lookup),
        Command::RemoveNodeAggregate(c) => node_removal::remove_aggregate(c, model, lookup),
        Command::CreateContentStream(c) => content_stream::create(c, lookup),
        Command::ForkContentStream(c) => content_stream::fork(c, lookup),
        Command::CloseContentStream(c) => content_stream::close(c, lookup),
        Command::ReopenContentStream(c) => content_stream::reopen(c, lookup),
        Command::RemoveContentStream(c) => content_stream::remove(c, lookup),
    };
    match decided {
        Ok(events) => {
            tracing::debug!(
                command = command.name(),
                stream = %events.stream,
                events = events.events.len(),
                "command decided"
            );
            let metadata = EventMetadata::for_command(command.name(), command.to_payload()?);
            Ok(events.with_metadata(metadata))
        }
        Err(err) => {
            tracing::debug!(command = command.name(), error = %err, "command rejected");
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! An in-memory lookup and a small content model for handler tests.

    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::config::RepositoryConfig;
    use crate::graph::test_support::{cs, id, origin};
    use crate::store::Version;

    pub const MODEL: &str = r#"
[[dimensions]]
id = "language"
values = [
    { value = "en" },
    { value = "de", generalization = "en" },
    { value = "ch", generalization = "de" },
    { value = "fr" },
]

[node_types."acme:Sites"]
super_types = ["dimgraph:Root"]
constraints = { "*" = true }

[node_types."acme:Document"]
abstract = true
constraints = { "*" = true }

[node_types."acme:Page"]
super_types = ["acme:Document"]
tethered = { main = "acme:Collection" }
tethered_constraints = { main = { "acme:Text" = true } }
properties.title = { type = "string", default = "Untitled" }
properties.hidden = { type = "boolean", scope = "nodeAggregate" }
properties.teaser = { type = "string", scope = "specializations" }
references.related = { node_types = { "acme:Page" = true }, max_items = 2 }
references.seeAlso = { scope = "nodeAggregate" }

[node_types."acme:Collection"]
constraints = { "acme:Text" = true }

[node_types."acme:Text"]
properties.text = { type = "string" }
"#;

    pub fn model() -> ContentModel {
        RepositoryConfig::from_toml_str(MODEL)
            .expect("config")
            .content_model()
            .expect("model")
    }

    #[derive(Default)]
    pub struct FakeLookup {
        pub streams: BTreeMap<ContentStreamId, ContentStreamRecord>,
        pub graphs: BTreeMap<ContentStreamId, ContentGraph>,
        pub in_use: BTreeSet<ContentStreamId>,
        /// Graph versions that differ from the registry; others follow it.
        pub graph_versions: BTreeMap<ContentStreamId, Version>,
    }

    impl FakeLookup {
        /// An open stream `cs` at version 0 holding `graph`.
        pub fn with_graph(graph: ContentGraph) -> Self {
            let mut lookup = Self::default();
            lookup.streams.insert(cs(), ContentStreamRecord::new(cs(), Version::new(0)));
            lookup.graphs.insert(cs(), graph);
            lookup
        }

        /// Apply decided events to the graph, as the projection would.
        pub fn apply(&mut self, decided: &EventsToPublish) {
            let graph = self.graphs.entry(cs()).or_default();
            for event in &decided.events {
                graph.apply(event).expect("apply decided event");
            }
            if let Some(record) = self.streams.get_mut(&cs()) {
                record.version = Version::new(record.version.value() + decided.events.len() as u64);
            }
        }

        pub fn graph(&self) -> &ContentGraph {
            &self.graphs[&cs()]
        }
    }

    impl ContentStreamLookup for FakeLookup {
        fn content_stream(
            &self,
            id: &ContentStreamId,
        ) -> Result<Option<ContentStreamRecord>, CommandError> {
            Ok(self.streams.get(id).cloned())
        }

        fn is_in_use(&self, id: &ContentStreamId) -> Result<bool, CommandError> {
            Ok(self.in_use.contains(id))
        }

        fn content_graph(&self, id: &ContentStreamId) -> Result<ContentGraph, CommandError> {
            Ok(self.graphs.get(id).cloned().unwrap_or_default())
        }

        fn content_graph_version(
            &self,
            id: &ContentStreamId,
        ) -> Result<Option<Version>, CommandError> {
            Ok(self.graph_versions.get(id).copied().or_else(|| {
                self.streams.get(id).map(|record| record.version)
            }))
        }
    }

    /// Decide and apply, panicking on rejection.
    pub fn run(lookup: &mut FakeLookup, command: Command) -> EventsToPublish {
        let decided = decide(&command, &model(), lookup).expect("command accepted");
        lookup.apply(&decided);
        decided
    }

    pub fn create_sites() -> Command {
        Command::CreateRootNodeAggregateWithNode(CreateRootNodeAggregateWithNode {
            content_stream_id: cs(),
            node_aggregate_id: id("sites"),
            node_type_name: NodeTypeName::new("acme:Sites"),
            tethered_descendant_node_aggregate_ids: BTreeMap::new(),
        })
    }

    pub fn create_page(node: &str, parent: &str, at: &str, name: &str) -> Command {
        Command::CreateNodeAggregateWithNode(CreateNodeAggregateWithNode {
            content_stream_id: cs(),
            node_aggregate_id: id(node),
            node_type_name: NodeTypeName::new("acme:Page"),
            origin_dimension_space_point: origin(at),
            parent_node_aggregate_id: id(parent),
            succeeding_sibling_node_aggregate_id: None,
            node_name: Some(NodeName::new(name)),
            initial_property_values: SerializedPropertyValues::new(),
            tethered_descendant_node_aggregate_ids: BTreeMap::new(),
        })
    }

    /// The `acme:Sites` root on an empty stream.
    pub fn with_sites() -> FakeLookup {
        let mut lookup = FakeLookup::with_graph(ContentGraph::new());
        run(&mut lookup, create_sites());
        lookup
    }

    /// Id of the `main` collection of a page.
    pub fn main_of(page: &str) -> NodeAggregateId {
        NodeAggregateId::for_tethered_descendant(&id(page), &[NodeName::new("main")])
    }
}
