//! Root and regular node creation, including tethered descendants.

use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};
use crate::event::EventData;
use crate::event::data::{
    InterdimensionalSibling, NodeAggregateWithNodeWasCreated, NodeVariantWasCreated,
    RootNodeAggregateDimensionsWereUpdated, RootNodeAggregateWithNodeWasCreated,
};
use crate::graph::ContentGraph;
use crate::model::{
    ContentStreamId, NodeAggregateClassification, NodeAggregateId, NodeName, NodePath, NodeType,
};

use super::checks::{
    load_writable, require_aggregate, require_allowed_point, require_child_allowed, require_covers,
    require_name_not_covered, require_name_not_reserved, require_no_aggregate, require_node_type,
    require_not_abstract, require_not_root_type, require_root, require_root_type,
    require_tethered_types, require_valid_properties,
};
use super::node_variation::variant_event;
use super::{
    CommandError, ContentStreamLookup, CreateNodeAggregateWithNode, CreateRootNodeAggregateWithNode,
    EventsToPublish, NodeAggregateIdsByNodePaths, UpdateRootNodeAggregateDimensions,
};

pub(super) fn create_root(
    command: &CreateRootNodeAggregateWithNode,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let node_type = require_node_type(model, &command.node_type_name)?;
    require_not_abstract(node_type)?;
    require_root_type(node_type)?;
    require_tethered_types(model, node_type)?;
    if graph.root_aggregate_by_type(&command.node_type_name).is_some() {
        return Err(CommandError::RootNodeAggregateTypeIsAlreadyOccupied(
            command.node_type_name.clone(),
        ));
    }
    require_no_aggregate(&graph, &command.node_aggregate_id)?;

    let variation = &model.variation_graph;
    let mut events = vec![EventData::RootNodeAggregateWithNodeWasCreated(
        RootNodeAggregateWithNodeWasCreated {
            content_stream_id: command.content_stream_id.clone(),
            node_aggregate_id: command.node_aggregate_id.clone(),
            node_type_name: command.node_type_name.clone(),
            covered_dimension_space_points: variation.allowed_dimension_subspace().clone(),
            node_aggregate_classification: NodeAggregateClassification::Root,
        },
    )];

    // Tethered children start at the first root generalization and are
    // varied to every other one.
    let mut generalizations = variation.root_generalizations().into_iter();
    if let Some(first) = generalizations.next() {
        let first_origin = OriginDimensionSpacePoint::from_point(first.clone());
        let covered = variation.specialization_set(&first, true, &DimensionSpacePointSet::new())?;
        let mut created = Vec::new();
        let mut variants = Vec::new();
        TetheredCreation {
            model,
            content_stream_id: &command.content_stream_id,
            top: &command.node_aggregate_id,
            given: &command.tethered_descendant_node_aggregate_ids,
            origin: &first_origin,
            covered: &covered,
        }
        .create(node_type, &command.node_aggregate_id, &mut Vec::new(), &mut created)?;

        for generalization in generalizations {
            let covered =
                variation.specialization_set(
                    &generalization,
                    true,
                    &DimensionSpacePointSet::new(),
                )?;
            let target = OriginDimensionSpacePoint::from_point(generalization.clone());
            let kind = variation.variant_type(&generalization, &first);
            for event in &created {
                let EventData::NodeAggregateWithNodeWasCreated(e) = event else {
                    continue;
                };
                variants.push(variant_event(
                    kind,
                    NodeVariantWasCreated {
                        content_stream_id: command.content_stream_id.clone(),
                        node_aggregate_id: e.node_aggregate_id.clone(),
                        source_origin: first_origin.clone(),
                        target_origin: target.clone(),
                        variant_succeeding_siblings: at_end(&covered),
                    },
                ));
            }
        }
        events.extend(created);
        events.extend(variants);
    }
    require_new_ids(&graph, &events[1..])?;

    Ok(EventsToPublish::for_content_stream(&record, events))
}

pub(super) fn update_root_dimensions(
    command: &UpdateRootNodeAggregateDimensions,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_root(&aggregate)?;
    let events = vec![EventData::RootNodeAggregateDimensionsWereUpdated(
        RootNodeAggregateDimensionsWereUpdated {
            content_stream_id: command.content_stream_id.clone(),
            node_aggregate_id: command.node_aggregate_id.clone(),
            covered_dimension_space_points: model
                .variation_graph
                .allowed_dimension_subspace()
                .clone(),
        },
    )];
    Ok(EventsToPublish::for_content_stream(&record, events))
}

pub(super) fn create_node(
    command: &CreateNodeAggregateWithNode,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let node_type = require_node_type(model, &command.node_type_name)?;
    require_not_abstract(node_type)?;
    require_not_root_type(node_type)?;
    require_tethered_types(model, node_type)?;
    require_no_aggregate(&graph, &command.node_aggregate_id)?;

    let origin = &command.origin_dimension_space_point;
    require_allowed_point(model, origin.as_point())?;
    let parent = require_aggregate(&graph, &command.parent_node_aggregate_id)?;
    require_covers(&parent, origin.as_point())?;

    let covered: DimensionSpacePointSet = model
        .variation_graph
        .specialization_set(origin.as_point(), true, &DimensionSpacePointSet::new())?
        .intersection(&parent.covered)
        .cloned()
        .collect();

    if let Some(name) = &command.node_name {
        let parent_type = require_node_type(model, &parent.node_type_name)?;
        require_name_not_reserved(&parent, parent_type, name)?;
        require_name_not_covered(&graph, &parent.id, name, &covered, None)?;
    }
    require_child_allowed(model, &graph, &parent, node_type)?;

    let mut properties = node_type.default_values();
    properties.merge(&command.initial_property_values);
    require_valid_properties(node_type, &properties)?;

    let siblings = creation_siblings(
        &graph,
        &parent.id,
        origin.as_point(),
        command.succeeding_sibling_node_aggregate_id.as_ref(),
        &covered,
    )?;

    let mut events = vec![EventData::NodeAggregateWithNodeWasCreated(
        NodeAggregateWithNodeWasCreated {
            content_stream_id: command.content_stream_id.clone(),
            node_aggregate_id: command.node_aggregate_id.clone(),
            node_type_name: command.node_type_name.clone(),
            origin_dimension_space_point: origin.clone(),
            succeeding_siblings_for_coverage: siblings,
            parent_node_aggregate_id: parent.id.clone(),
            node_name: command.node_name.clone(),
            initial_property_values: properties,
            node_aggregate_classification: NodeAggregateClassification::Regular,
        },
    )];
    TetheredCreation {
        model,
        content_stream_id: &command.content_stream_id,
        top: &command.node_aggregate_id,
        given: &command.tethered_descendant_node_aggregate_ids,
        origin,
        covered: &covered,
    }
    .create(node_type, &command.node_aggregate_id, &mut Vec::new(), &mut events)?;
    require_new_ids(&graph, &events[1..])?;

    Ok(EventsToPublish::for_content_stream(&record, events))
}

/// Creation of the tethered descendants of one new node at one origin.
struct TetheredCreation<'a> {
    model: &'a ContentModel,
    content_stream_id: &'a ContentStreamId,
    /// The node the command creates; derived ids hang off it.
    top: &'a NodeAggregateId,
    given: &'a NodeAggregateIdsByNodePaths,
    origin: &'a OriginDimensionSpacePoint,
    covered: &'a DimensionSpacePointSet,
}

impl TetheredCreation<'_> {
    fn create(
        &self,
        node_type: &NodeType,
        parent: &NodeAggregateId,
        path: &mut Vec<NodeName>,
        out: &mut Vec<EventData>,
    ) -> Result<(), CommandError> {
        for (name, child_type_name) in &node_type.tethered {
            let child_type = require_node_type(self.model, child_type_name)?;
            path.push(name.clone());
            let id = self
                .given
                .get(&NodePath::from_names(path))
                .cloned()
                .unwrap_or_else(|| NodeAggregateId::for_tethered_descendant(self.top, path));
            out.push(EventData::NodeAggregateWithNodeWasCreated(
                NodeAggregateWithNodeWasCreated {
                    content_stream_id: self.content_stream_id.clone(),
                    node_aggregate_id: id.clone(),
                    node_type_name: child_type.name.clone(),
                    origin_dimension_space_point: self.origin.clone(),
                    succeeding_siblings_for_coverage: at_end(self.covered),
                    parent_node_aggregate_id: parent.clone(),
                    node_name: Some(name.clone()),
                    initial_property_values: child_type.default_values(),
                    node_aggregate_classification: NodeAggregateClassification::Tethered,
                },
            ));
            self.create(child_type, &id, path, out)?;
            path.pop();
        }
        Ok(())
    }
}

/// Every covered point, appending at the end.
fn at_end(covered: &DimensionSpacePointSet) -> Vec<InterdimensionalSibling> {
    covered
        .iter()
        .map(|p| InterdimensionalSibling::new(p.clone(), None))
        .collect()
}

/// Position of a new node in each covered point: before the requested
/// sibling where it is a child of the parent, else before the first of the
/// sibling's own successors (as seen from the origin) that is, else last.
fn creation_siblings(
    graph: &ContentGraph,
    parent: &NodeAggregateId,
    origin: &DimensionSpacePoint,
    succeeding: Option<&NodeAggregateId>,
    covered: &DimensionSpacePointSet,
) -> Result<Vec<InterdimensionalSibling>, CommandError> {
    let mut candidates = Vec::new();
    if let Some(sibling) = succeeding {
        if !graph.contains_aggregate(sibling) {
            return Err(CommandError::NodeAggregateCurrentlyDoesNotExist(sibling.clone()));
        }
        if graph.parent_of(sibling, origin) != Some(parent) {
            return Err(CommandError::NodeAggregateIsNoChild {
                parent: parent.clone(),
                child: sibling.clone(),
                point: origin.clone(),
            });
        }
        candidates.push(sibling.clone());
        candidates.extend(graph.succeeding_siblings(sibling, origin));
    }
    Ok(covered
        .iter()
        .map(|point| {
            let sibling = candidates
                .iter()
                .find(|c| graph.parent_of(c, point) == Some(parent))
                .cloned();
            InterdimensionalSibling::new(point.clone(), sibling)
        })
        .collect())
}

/// Ids created by tethered descendants must be unused.
fn require_new_ids(graph: &ContentGraph, events: &[EventData]) -> Result<(), CommandError> {
    for event in events {
        if let EventData::NodeAggregateWithNodeWasCreated(e) = event {
            require_no_aggregate(graph, &e.node_aggregate_id)?;
        }
    }
    Ok(())
}
