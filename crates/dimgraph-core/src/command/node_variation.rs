//! Node variants: copying a node to another origin.

use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePointSet, OriginDimensionSpacePoint, VariantType};
use crate::event::EventData;
use crate::event::data::{InterdimensionalSibling, NodeVariantWasCreated};
use crate::graph::{ContentGraph, NodeAggregate};
use crate::model::ContentStreamId;

use super::checks::{
    load_writable, require_aggregate, require_allowed_point, require_covers, require_not_occupied,
    require_not_root, require_not_tethered, require_occupied,
};
use super::{CommandError, ContentStreamLookup, CreateNodeVariant, EventsToPublish};

/// The variant event matching how the target relates to the source.
pub(crate) fn variant_event(kind: VariantType, payload: NodeVariantWasCreated) -> EventData {
    match kind {
        VariantType::Specialization => EventData::NodeSpecializationVariantWasCreated(payload),
        VariantType::Generalization => EventData::NodeGeneralizationVariantWasCreated(payload),
        VariantType::Same | VariantType::Peer => EventData::NodePeerVariantWasCreated(payload),
    }
}

pub(super) fn create_variant(
    command: &CreateNodeVariant,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_allowed_point(model, command.source_origin.as_point())?;
    require_allowed_point(model, command.target_origin.as_point())?;
    require_not_root(&aggregate)?;
    require_not_tethered(&aggregate)?;
    require_occupied(&aggregate, &command.source_origin)?;
    require_not_occupied(&aggregate, &command.target_origin)?;

    let parent_id = graph
        .parent_of(&aggregate.id, command.source_origin.as_point())
        .cloned()
        .ok_or_else(|| CommandError::NodeAggregateDoesCurrentlyNotCoverDimensionSpacePoint {
            id: aggregate.id.clone(),
            point: command.source_origin.to_point(),
        })?;
    let parent = require_aggregate(&graph, &parent_id)?;
    require_covers(&parent, command.target_origin.as_point())?;

    let mut events = Vec::new();
    Variation {
        model,
        graph: &graph,
        content_stream_id: &command.content_stream_id,
        source: &command.source_origin,
        target: &command.target_origin,
    }
    .vary(&aggregate, &parent.covered, &mut events)?;

    Ok(EventsToPublish::for_content_stream(&record, events))
}

struct Variation<'a> {
    model: &'a ContentModel,
    graph: &'a ContentGraph,
    content_stream_id: &'a ContentStreamId,
    source: &'a OriginDimensionSpacePoint,
    target: &'a OriginDimensionSpacePoint,
}

impl Variation<'_> {
    /// Emit the variant of `aggregate`, then recurse into its tethered
    /// children with the new variant's coverage as their limit.
    fn vary(
        &self,
        aggregate: &NodeAggregate,
        parent_coverage: &DimensionSpacePointSet,
        out: &mut Vec<EventData>,
    ) -> Result<(), CommandError> {
        let variation = &self.model.variation_graph;
        let covered: DimensionSpacePointSet = variation
            .fan_out(
                self.target.as_point(),
                aggregate.occupied.iter().map(OriginDimensionSpacePoint::as_point),
            )?
            .intersection(parent_coverage)
            .cloned()
            .collect();

        let parent = self.graph.parent_of(&aggregate.id, self.source.as_point());
        let successors = self
            .graph
            .succeeding_siblings(&aggregate.id, self.source.as_point());
        let siblings = covered
            .iter()
            .map(|point| {
                let sibling = successors
                    .iter()
                    .find(|s| self.graph.parent_of(s, point) == parent)
                    .cloned();
                InterdimensionalSibling::new(point.clone(), sibling)
            })
            .collect();

        let kind = variation.variant_type(self.target.as_point(), self.source.as_point());
        out.push(variant_event(
            kind,
            NodeVariantWasCreated {
                content_stream_id: self.content_stream_id.clone(),
                node_aggregate_id: aggregate.id.clone(),
                source_origin: self.source.clone(),
                target_origin: self.target.clone(),
                variant_succeeding_siblings: siblings,
            },
        ));

        for child_id in self.graph.tethered_child_aggregate_ids(&aggregate.id) {
            let child = require_aggregate(self.graph, &child_id)?;
            if child.occupies(self.source) && !child.occupies(self.target) {
                self.vary(&child, &covered, out)?;
            }
        }
        Ok(())
    }
}
