//! Structure checks for a materialized content graph.
//!
//! The checker compares a graph against the current [`ContentModel`] and
//! reports every mismatch as an [`Adjustment`]. Nothing is changed here:
//! where a fix exists, the adjustment carries the events that would apply
//! it, and the caller decides whether to append them.

use std::collections::BTreeSet;

use serde::Serialize;

use super::{ContentGraph, NodeAggregate};
use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePointSet, OriginDimensionSpacePoint, VariantType};
use crate::event::EventData;
use crate::event::data::{
    InterdimensionalSibling, NodeAggregateWasRemoved, NodeAggregateWithNodeWasCreated,
    NodePropertiesWereSet, NodeVariantWasCreated,
};
use crate::model::{
    ContentStreamId, NodeAggregateClassification, NodeAggregateId, NodeName, NodeType,
    SerializedPropertyValues,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AdjustmentKind {
    /// A variant covers a point that is neither its origin nor a
    /// specialization of it.
    CoverageInconsistentWithOrigin,
    /// A node's parent does not cover the point the node is covered in.
    DisconnectedHierarchy,
    TetheredNodeMissing,
    TetheredNodeNotDeclared,
    NodeTypeMissing,
    UndeclaredProperty,
}

impl AdjustmentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoverageInconsistentWithOrigin => "coverageInconsistentWithOrigin",
            Self::DisconnectedHierarchy => "disconnectedHierarchy",
            Self::TetheredNodeMissing => "tetheredNodeMissing",
            Self::TetheredNodeNotDeclared => "tetheredNodeNotDeclared",
            Self::NodeTypeMissing => "nodeTypeMissing",
            Self::UndeclaredProperty => "undeclaredProperty",
        }
    }
}

/// One structural problem, with its fix if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub kind: AdjustmentKind,
    pub node_aggregate_ids: Vec<NodeAggregateId>,
    pub message: String,
    /// Events that resolve the problem when appended to the content stream.
    pub remediation: Option<Vec<EventData>>,
}

impl Adjustment {
    fn report(kind: AdjustmentKind, id: &NodeAggregateId, message: String) -> Self {
        Self {
            kind,
            node_aggregate_ids: vec![id.clone()],
            message,
            remediation: None,
        }
    }

    #[must_use]
    pub const fn is_remediable(&self) -> bool {
        self.remediation.is_some()
    }

    /// Summary used by operator tooling.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "nodeAggregateIds": self.node_aggregate_ids,
            "message": self.message,
            "remediable": self.is_remediable(),
        })
    }
}

/// Run every check against `graph`.
#[must_use]
pub fn check_integrity(
    graph: &ContentGraph,
    model: &ContentModel,
    content_stream_id: &ContentStreamId,
) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();
    check_hierarchy(graph, model, &mut adjustments);

    for (id, record) in graph.aggregate_records() {
        let Some(aggregate) = graph.node_aggregate(id) else {
            continue;
        };
        let Some(node_type) = model.node_types.get(&record.node_type_name) else {
            adjustments.push(Adjustment {
                kind: AdjustmentKind::NodeTypeMissing,
                node_aggregate_ids: vec![id.clone()],
                message: format!(
                    "node aggregate {id} has node type {} which is not declared",
                    record.node_type_name
                ),
                remediation: Some(vec![removal(&aggregate, content_stream_id)]),
            });
            continue;
        };
        check_properties(graph, &aggregate, node_type, content_stream_id, &mut adjustments);
        check_tethered(graph, model, &aggregate, node_type, content_stream_id, &mut adjustments);
    }

    tracing::debug!(
        content_stream = %content_stream_id,
        adjustments = adjustments.len(),
        "checked content graph structure"
    );
    adjustments
}

fn check_hierarchy(graph: &ContentGraph, model: &ContentModel, out: &mut Vec<Adjustment>) {
    let variation = &model.variation_graph;
    for relation in graph.relations() {
        let is_root = graph
            .aggregate_record(&relation.child)
            .is_some_and(|a| a.classification == NodeAggregateClassification::Root);
        if is_root {
            continue;
        }
        let relation_type =
            variation.variant_type(
                &relation.dimension_space_point,
                relation.child_origin.as_point(),
            );
        if !matches!(relation_type, VariantType::Same | VariantType::Specialization) {
            out.push(Adjustment::report(
                AdjustmentKind::CoverageInconsistentWithOrigin,
                &relation.child,
                format!(
                    "variant {} of {} covers {}, which does not fall back to it",
                    relation.child_origin, relation.child, relation.dimension_space_point
                ),
            ));
        }
        if let Some(parent) = &relation.parent {
            if graph.relation(&relation.dimension_space_point, parent).is_none() {
                out.push(Adjustment {
                    kind: AdjustmentKind::DisconnectedHierarchy,
                    node_aggregate_ids: vec![relation.child.clone(), parent.clone()],
                    message: format!(
                        "{} is covered in {} but its parent {parent} is not",
                        relation.child, relation.dimension_space_point
                    ),
                    remediation: None,
                });
            }
        }
    }
}

fn check_properties(
    graph: &ContentGraph,
    aggregate: &NodeAggregate,
    node_type: &NodeType,
    content_stream_id: &ContentStreamId,
    out: &mut Vec<Adjustment>,
) {
    for node in graph.nodes_of(&aggregate.id) {
        for name in node.properties.names() {
            if node_type.property(name).is_some() {
                continue;
            }
            let origin = &node.origin_dimension_space_point;
            out.push(Adjustment {
                kind: AdjustmentKind::UndeclaredProperty,
                node_aggregate_ids: vec![aggregate.id.clone()],
                message: format!(
                    "property {name} of {} at {origin} is not declared by {}",
                    aggregate.id, node_type.name
                ),
                remediation: Some(vec![EventData::NodePropertiesWereSet(NodePropertiesWereSet {
                    content_stream_id: content_stream_id.clone(),
                    node_aggregate_id: aggregate.id.clone(),
                    origin_dimension_space_point: origin.clone(),
                    affected_dimension_space_points: aggregate.coverage_of(origin),
                    property_values: SerializedPropertyValues::new(),
                    properties_to_unset: BTreeSet::from([name.clone()]),
                })]),
            });
        }
    }
}

fn check_tethered(
    graph: &ContentGraph,
    model: &ContentModel,
    aggregate: &NodeAggregate,
    node_type: &NodeType,
    content_stream_id: &ContentStreamId,
    out: &mut Vec<Adjustment>,
) {
    for (name, child_type_name) in &node_type.tethered {
        let present = graph
            .tethered_child_aggregate_ids(&aggregate.id)
            .into_iter()
            .any(|child| {
                graph
                    .aggregate_record(&child)
                    .is_some_and(|a| a.node_name.as_ref() == Some(name))
            });
        if present {
            continue;
        }
        let remediation = model.node_types.get(child_type_name).map(|child_type| {
            missing_tethered_events(model, aggregate, name, child_type, content_stream_id)
        });
        out.push(Adjustment {
            kind: AdjustmentKind::TetheredNodeMissing,
            node_aggregate_ids: vec![aggregate.id.clone()],
            message: format!("tethered child {name} of {} is missing", aggregate.id),
            remediation,
        });
    }

    if !aggregate.is_tethered() {
        return;
    }
    for parent in graph.parent_aggregate_ids(&aggregate.id) {
        let Some(parent_type) = graph
            .aggregate_record(&parent)
            .and_then(|p| model.node_types.get(&p.node_type_name))
        else {
            continue;
        };
        let declared = aggregate
            .node_name
            .as_ref()
            .is_some_and(|n| parent_type.tethered.contains_key(n));
        if !declared {
            out.push(Adjustment {
                kind: AdjustmentKind::TetheredNodeNotDeclared,
                node_aggregate_ids: vec![aggregate.id.clone()],
                message: format!(
                    "{} is tethered to {parent} but {} declares no such child",
                    aggregate.id, parent_type.name
                ),
                remediation: Some(vec![removal(aggregate, content_stream_id)]),
            });
        }
    }
}

/// Create the missing child at the parent's first origin and vary it to the
/// remaining origins.
fn missing_tethered_events(
    model: &ContentModel,
    parent: &NodeAggregate,
    name: &NodeName,
    child_type: &NodeType,
    content_stream_id: &ContentStreamId,
) -> Vec<EventData> {
    let variation = &model.variation_graph;
    let coverage: Vec<(OriginDimensionSpacePoint, DimensionSpacePointSet)> = if parent.is_root() {
        variation
            .root_generalizations()
            .into_iter()
            .map(|g| {
                let covered = variation
                    .specialization_set(&g, true, &DimensionSpacePointSet::new())
                    .unwrap_or_default()
                    .intersection(&parent.covered)
                    .cloned()
                    .collect();
                (OriginDimensionSpacePoint::from_point(g), covered)
            })
            .collect()
    } else {
        parent
            .coverage_by_origin
            .iter()
            .map(|(origin, covered)| (origin.clone(), covered.clone()))
            .collect()
    };

    let child_id = NodeAggregateId::for_tethered_descendant(&parent.id, std::slice::from_ref(name));
    let siblings = |covered: &DimensionSpacePointSet| {
        covered
            .iter()
            .map(|p| InterdimensionalSibling::new(p.clone(), None))
            .collect::<Vec<_>>()
    };

    let mut events = Vec::new();
    let mut first: Option<OriginDimensionSpacePoint> = None;
    for (origin, covered) in coverage {
        if covered.is_empty() {
            continue;
        }
        match &first {
            None => {
                events.push(EventData::NodeAggregateWithNodeWasCreated(
                    NodeAggregateWithNodeWasCreated {
                        content_stream_id: content_stream_id.clone(),
                        node_aggregate_id: child_id.clone(),
                        node_type_name: child_type.name.clone(),
                        origin_dimension_space_point: origin.clone(),
                        succeeding_siblings_for_coverage: siblings(&covered),
                        parent_node_aggregate_id: parent.id.clone(),
                        node_name: Some(name.clone()),
                        initial_property_values: child_type.default_values(),
                        node_aggregate_classification: NodeAggregateClassification::Tethered,
                    },
                ));
                first = Some(origin);
            }
            Some(source) => {
                let payload = NodeVariantWasCreated {
                    content_stream_id: content_stream_id.clone(),
                    node_aggregate_id: child_id.clone(),
                    source_origin: source.clone(),
                    target_origin: origin.clone(),
                    variant_succeeding_siblings: siblings(&covered),
                };
                events.push(
                    match variation.variant_type(origin.as_point(), source.as_point()) {
                        VariantType::Specialization => {
                            EventData::NodeSpecializationVariantWasCreated(payload)
                        }
                        VariantType::Generalization => {
                            EventData::NodeGeneralizationVariantWasCreated(payload)
                        }
                        VariantType::Same | VariantType::Peer => {
                            EventData::NodePeerVariantWasCreated(payload)
                        }
                    },
                );
            }
        }
    }
    events
}

fn removal(aggregate: &NodeAggregate, content_stream_id: &ContentStreamId) -> EventData {
    EventData::NodeAggregateWasRemoved(NodeAggregateWasRemoved {
        content_stream_id: content_stream_id.clone(),
        node_aggregate_id: aggregate.id.clone(),
        affected_occupied_dimension_space_points: aggregate.occupied.clone(),
        affected_covered_dimension_space_points: aggregate.covered.clone(),
    })
}
