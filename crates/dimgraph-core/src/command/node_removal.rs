//! Removing aggregates, in all variants or in a specialization subtree.

use crate::config::ContentModel;
use crate::dimension::DimensionSpacePointSet;
use crate::event::EventData;
use crate::event::data::NodeAggregateWasRemoved;

use super::checks::{
    load_writable, require_aggregate, require_allowed_point, require_covers, require_not_tethered,
};
use super::{
    CommandError, ContentStreamLookup, EventsToPublish, NodeVariantSelectionStrategy,
    RemoveNodeAggregate,
};

pub(super) fn remove_aggregate(
    command: &RemoveNodeAggregate,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_not_tethered(&aggregate)?;
    let point = &command.covered_dimension_space_point;
    require_allowed_point(model, point)?;
    require_covers(&aggregate, point)?;

    let (covered, occupied) = match command.node_variant_selection_strategy {
        NodeVariantSelectionStrategy::AllVariants => {
            (aggregate.covered.clone(), aggregate.occupied.clone())
        }
        NodeVariantSelectionStrategy::AllSpecializations => {
            let covered: DimensionSpacePointSet = model
                .variation_graph
                .specialization_set(point, true, &DimensionSpacePointSet::new())?
                .intersection(&aggregate.covered)
                .cloned()
                .collect();
            let occupied = aggregate
                .occupied
                .iter()
                .filter(|o| covered.contains(o.as_point()))
                .cloned()
                .collect();
            (covered, occupied)
        }
    };
    tracing::debug!(
        node_aggregate_id = %aggregate.id,
        covered = covered.len(),
        occupied = occupied.len(),
        "removing node aggregate"
    );

    let event = EventData::NodeAggregateWasRemoved(NodeAggregateWasRemoved {
        content_stream_id: command.content_stream_id.clone(),
        node_aggregate_id: aggregate.id.clone(),
        affected_occupied_dimension_space_points: occupied,
        affected_covered_dimension_space_points: covered,
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}
