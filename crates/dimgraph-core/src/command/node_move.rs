//! Moving aggregates to another parent or position.

use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePoint, DimensionSpacePointSet};
use crate::event::EventData;
use crate::event::data::{InterdimensionalSibling, NodeAggregateWasMoved};
use crate::graph::{ContentGraph, NodeAggregate};
use crate::model::NodeAggregateId;

use super::checks::{
    load_writable, require_aggregate, require_allowed_point, require_child_allowed, require_covers,
    require_covers_all, require_name_not_covered, require_name_not_reserved, require_node_type,
    require_not_root, require_not_tethered,
};
use super::{
    CommandError, ContentStreamLookup, EventsToPublish, MoveNodeAggregate,
    RelationDistributionStrategy,
};

pub(super) fn move_aggregate(
    command: &MoveNodeAggregate,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_not_root(&aggregate)?;
    require_not_tethered(&aggregate)?;
    let point = &command.dimension_space_point;
    require_allowed_point(model, point)?;
    require_covers(&aggregate, point)?;

    let affected =
        affected_points(model, &aggregate, point, command.relation_distribution_strategy)?;
    if let Some(new_parent_id) = &command.new_parent_node_aggregate_id {
        check_new_parent(model, &graph, &aggregate, new_parent_id, &affected)?;
    }

    let effective_parent = command
        .new_parent_node_aggregate_id
        .clone()
        .or_else(|| graph.parent_of(&aggregate.id, point).cloned());
    for sibling in [
        &command.new_succeeding_sibling_node_aggregate_id,
        &command.new_preceding_sibling_node_aggregate_id,
    ]
    .into_iter()
    .flatten()
    {
        require_aggregate(&graph, sibling)?;
        if sibling != &aggregate.id
            && graph.parent_of(sibling, point) == effective_parent.as_ref()
        {
            continue;
        }
        return Err(match &command.new_parent_node_aggregate_id {
            Some(parent) => CommandError::NodeAggregateIsNoChild {
                parent: parent.clone(),
                child: sibling.clone(),
                point: point.clone(),
            },
            None => CommandError::NodeAggregateIsNoSibling {
                id: aggregate.id.clone(),
                sibling: sibling.clone(),
                point: point.clone(),
            },
        });
    }

    let placement = Placement {
        graph: &graph,
        command,
        id: &aggregate.id,
    };
    let siblings = affected
        .iter()
        .filter_map(|p| {
            placement
                .succeeding_sibling_in(p)
                .map(|sibling| InterdimensionalSibling::new(p.clone(), sibling))
        })
        .collect();

    let event = EventData::NodeAggregateWasMoved(NodeAggregateWasMoved {
        content_stream_id: command.content_stream_id.clone(),
        node_aggregate_id: aggregate.id.clone(),
        new_parent_node_aggregate_id: command.new_parent_node_aggregate_id.clone(),
        succeeding_siblings_for_coverage: siblings,
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

fn affected_points(
    model: &ContentModel,
    aggregate: &NodeAggregate,
    point: &DimensionSpacePoint,
    strategy: RelationDistributionStrategy,
) -> Result<DimensionSpacePointSet, CommandError> {
    Ok(match strategy {
        RelationDistributionStrategy::Scatter => DimensionSpacePointSet::from([point.clone()]),
        RelationDistributionStrategy::GatherSpecializations => model
            .variation_graph
            .specialization_set(point, true, &DimensionSpacePointSet::new())?
            .intersection(&aggregate.covered)
            .cloned()
            .collect(),
        RelationDistributionStrategy::GatherAll => aggregate.covered.clone(),
    })
}

fn check_new_parent(
    model: &ContentModel,
    graph: &ContentGraph,
    aggregate: &NodeAggregate,
    new_parent_id: &NodeAggregateId,
    affected: &DimensionSpacePointSet,
) -> Result<(), CommandError> {
    let parent = require_aggregate(graph, new_parent_id)?;
    require_covers_all(&parent, affected)?;
    if affected
        .iter()
        .any(|p| graph.is_descendant_or_self(new_parent_id, &aggregate.id, p))
    {
        return Err(CommandError::NodeAggregateIsDescendant {
            candidate: new_parent_id.clone(),
            ancestor: aggregate.id.clone(),
        });
    }
    let node_type = require_node_type(model, &aggregate.node_type_name)?;
    require_child_allowed(model, graph, &parent, node_type)?;
    if let Some(name) = &aggregate.node_name {
        if let Some(parent_type) = model.node_types.get(&parent.node_type_name) {
            require_name_not_reserved(&parent, parent_type, name)?;
        }
        require_name_not_covered(graph, new_parent_id, name, affected, Some(&aggregate.id))?;
    }
    Ok(())
}

/// Resolves the requested siblings, given for the command's point, in each
/// affected point.
struct Placement<'a> {
    graph: &'a ContentGraph,
    command: &'a MoveNodeAggregate,
    id: &'a NodeAggregateId,
}

impl Placement<'_> {
    fn parent_in(&self, point: &DimensionSpacePoint) -> Option<NodeAggregateId> {
        self.command
            .new_parent_node_aggregate_id
            .clone()
            .or_else(|| self.graph.parent_of(self.id, point).cloned())
    }

    /// `None` leaves the point untouched; `Some(None)` moves to the end.
    fn succeeding_sibling_in(
        &self,
        point: &DimensionSpacePoint,
    ) -> Option<Option<NodeAggregateId>> {
        let origin_point = &self.command.dimension_space_point;
        let parent = self.parent_in(point);
        let placeable =
            |s: &NodeAggregateId| s != self.id && self.graph.parent_of(s, point) == parent.as_ref();

        if let Some(succeeding) = &self.command.new_succeeding_sibling_node_aggregate_id {
            let candidate = std::iter::once(succeeding.clone())
                .chain(self.graph.succeeding_siblings(succeeding, origin_point))
                .find(|s| placeable(s));
            if candidate.is_some() {
                return Some(candidate);
            }
        }
        if let Some(preceding) = &self.command.new_preceding_sibling_node_aggregate_id {
            let anchor = std::iter::once(preceding.clone())
                .chain(self.graph.preceding_siblings(preceding, origin_point))
                .find(|s| placeable(s));
            if let Some(anchor) = anchor {
                let next = self
                    .graph
                    .succeeding_siblings(&anchor, point)
                    .into_iter()
                    .find(|s| s != self.id);
                return Some(next);
            }
        }

        let siblings_given = self.command.new_succeeding_sibling_node_aggregate_id.is_some()
            || self.command.new_preceding_sibling_node_aggregate_id.is_some();
        if self.command.new_parent_node_aggregate_id.is_some() || !siblings_given {
            Some(None)
        } else {
            None
        }
    }
}
