//! Event application.
//!
//! Every node event carries the points it affects, so applying it never
//! needs the variation graph. Events that are not about graph content
//! (content stream and workspace lifecycle) are ignored here; forking is
//! handled by cloning the whole arena.

use std::collections::BTreeSet;

use super::{
    AggregateRecord, ContentGraph, HierarchyRelation, NodeRecord, node_key, relation_key,
};
use crate::dimension::{DimensionSpacePoint, OriginDimensionSpacePoint};
use crate::event::EventData;
use crate::event::data::{
    InterdimensionalSibling, NodeAggregateWasMoved, NodeAggregateWasRemoved,
    NodeAggregateWithNodeWasCreated, NodePropertiesWereSet, NodeReferencesWereSet,
    NodeVariantWasCreated, RootNodeAggregateDimensionsWereUpdated,
    RootNodeAggregateWithNodeWasCreated,
};
use crate::model::{NodeAggregateId, SerializedPropertyValues};

/// The event does not fit the current graph state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node aggregate {0} does not exist")]
    AggregateNotFound(NodeAggregateId),

    #[error("node aggregate {0} already exists")]
    AggregateAlreadyExists(NodeAggregateId),

    #[error("node aggregate {id} has no variant at {origin}")]
    NodeNotFound {
        id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
    },

    #[error("node aggregate {id} does not cover {point}")]
    RelationNotFound {
        id: NodeAggregateId,
        point: DimensionSpacePoint,
    },

    #[error("node aggregate {id} has no parent to attach a variant to")]
    ParentNotFound { id: NodeAggregateId },
}

impl ContentGraph {
    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when the event references state the graph does
    /// not have; the graph may be partially updated in that case and must be
    /// discarded.
    pub fn apply(&mut self, event: &EventData) -> Result<(), GraphError> {
        match event {
            EventData::RootNodeAggregateWithNodeWasCreated(e) => self.apply_root_created(e),
            EventData::RootNodeAggregateDimensionsWereUpdated(e) => {
                self.apply_root_dimensions_updated(e)
            }
            EventData::NodeAggregateWithNodeWasCreated(e) => self.apply_node_created(e),
            EventData::NodePropertiesWereSet(e) => self.apply_properties_set(e),
            EventData::NodeReferencesWereSet(e) => self.apply_references_set(e),
            EventData::NodeAggregateNameWasChanged(e) => {
                let record = self
                    .aggregates
                    .get_mut(&e.node_aggregate_id)
                    .ok_or_else(|| GraphError::AggregateNotFound(e.node_aggregate_id.clone()))?;
                record.node_name = Some(e.new_node_name.clone());
                Ok(())
            }
            EventData::NodeSpecializationVariantWasCreated(e)
            | EventData::NodeGeneralizationVariantWasCreated(e)
            | EventData::NodePeerVariantWasCreated(e) => self.apply_variant_created(e),
            EventData::NodeAggregateWasMoved(e) => self.apply_moved(e),
            EventData::NodeAggregateWasRemoved(e) => {
                self.apply_removed(e);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_root_created(
        &mut self,
        e: &RootNodeAggregateWithNodeWasCreated,
    ) -> Result<(), GraphError> {
        if self.aggregates.contains_key(&e.node_aggregate_id) {
            return Err(GraphError::AggregateAlreadyExists(e.node_aggregate_id.clone()));
        }
        let origin = OriginDimensionSpacePoint::empty();
        self.aggregates.insert(
            e.node_aggregate_id.clone(),
            AggregateRecord {
                classification: e.node_aggregate_classification,
                node_type_name: e.node_type_name.clone(),
                node_name: None,
            },
        );
        self.insert_node(NodeRecord {
            node_aggregate_id: e.node_aggregate_id.clone(),
            origin_dimension_space_point: origin.clone(),
            node_type_name: e.node_type_name.clone(),
            properties: SerializedPropertyValues::new(),
            references: std::collections::BTreeMap::new(),
        });
        for point in &e.covered_dimension_space_points {
            self.attach(point, None, &e.node_aggregate_id, &origin, None);
        }
        Ok(())
    }

    fn apply_root_dimensions_updated(
        &mut self,
        e: &RootNodeAggregateDimensionsWereUpdated,
    ) -> Result<(), GraphError> {
        let origin = self
            .nodes_of(&e.node_aggregate_id)
            .next()
            .map(|n| n.origin_dimension_space_point.clone())
            .ok_or_else(|| GraphError::AggregateNotFound(e.node_aggregate_id.clone()))?;
        let stale: Vec<String> = self
            .hierarchy
            .iter()
            .filter(|(_, r)| {
                r.child == e.node_aggregate_id
                    && !e.covered_dimension_space_points.contains(&r.dimension_space_point)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.hierarchy.remove(&key);
        }
        for point in &e.covered_dimension_space_points {
            if self.relation(point, &e.node_aggregate_id).is_none() {
                self.attach(point, None, &e.node_aggregate_id, &origin, None);
            }
        }
        Ok(())
    }

    fn apply_node_created(
        &mut self,
        e: &NodeAggregateWithNodeWasCreated,
    ) -> Result<(), GraphError> {
        if self.aggregates.contains_key(&e.node_aggregate_id) {
            return Err(GraphError::AggregateAlreadyExists(e.node_aggregate_id.clone()));
        }
        if !self.aggregates.contains_key(&e.parent_node_aggregate_id) {
            return Err(GraphError::AggregateNotFound(e.parent_node_aggregate_id.clone()));
        }
        self.aggregates.insert(
            e.node_aggregate_id.clone(),
            AggregateRecord {
                classification: e.node_aggregate_classification,
                node_type_name: e.node_type_name.clone(),
                node_name: e.node_name.clone(),
            },
        );
        self.insert_node(NodeRecord {
            node_aggregate_id: e.node_aggregate_id.clone(),
            origin_dimension_space_point: e.origin_dimension_space_point.clone(),
            node_type_name: e.node_type_name.clone(),
            properties: e.initial_property_values.clone(),
            references: std::collections::BTreeMap::new(),
        });
        for sibling in &e.succeeding_siblings_for_coverage {
            self.attach(
                &sibling.dimension_space_point,
                Some(&e.parent_node_aggregate_id),
                &e.node_aggregate_id,
                &e.origin_dimension_space_point,
                sibling.node_aggregate_id.as_ref(),
            );
        }
        Ok(())
    }

    fn apply_properties_set(&mut self, e: &NodePropertiesWereSet) -> Result<(), GraphError> {
        let node = self.node_mut(&e.node_aggregate_id, &e.origin_dimension_space_point)?;
        node.properties.merge(&e.property_values);
        for name in &e.properties_to_unset {
            node.properties.remove(name);
        }
        Ok(())
    }

    fn apply_references_set(&mut self, e: &NodeReferencesWereSet) -> Result<(), GraphError> {
        for origin in &e.affected_source_origin_dimension_space_points {
            let node = self.node_mut(&e.node_aggregate_id, origin)?;
            if e.references.is_empty() {
                node.references.remove(&e.reference_name);
            } else {
                node.references
                    .insert(e.reference_name.clone(), e.references.clone());
            }
        }
        Ok(())
    }

    fn apply_variant_created(&mut self, e: &NodeVariantWasCreated) -> Result<(), GraphError> {
        let source = self
            .node(&e.node_aggregate_id, &e.source_origin)
            .cloned()
            .ok_or_else(|| GraphError::NodeNotFound {
                id: e.node_aggregate_id.clone(),
                origin: e.source_origin.clone(),
            })?;
        let parent = self
            .parent_of(&e.node_aggregate_id, e.source_origin.as_point())
            .cloned()
            .or_else(|| self.parent_aggregate_ids(&e.node_aggregate_id).into_iter().next());

        self.insert_node(NodeRecord {
            origin_dimension_space_point: e.target_origin.clone(),
            ..source
        });

        for InterdimensionalSibling {
            dimension_space_point: point,
            node_aggregate_id: succeeding,
        } in &e.variant_succeeding_siblings
        {
            let key = relation_key(point, &e.node_aggregate_id);
            if let Some(existing) = self.hierarchy.get_mut(&key) {
                existing.child_origin = e.target_origin.clone();
                continue;
            }
            let Some(parent) = parent.as_ref() else {
                return Err(GraphError::ParentNotFound {
                    id: e.node_aggregate_id.clone(),
                });
            };
            self.attach(
                point,
                Some(parent),
                &e.node_aggregate_id,
                &e.target_origin,
                succeeding.as_ref(),
            );
        }
        self.collect_garbage(&[e.node_aggregate_id.clone()]);
        Ok(())
    }

    fn apply_moved(&mut self, e: &NodeAggregateWasMoved) -> Result<(), GraphError> {
        for sibling in &e.succeeding_siblings_for_coverage {
            let point = &sibling.dimension_space_point;
            let key = relation_key(point, &e.node_aggregate_id);
            let relation = self
                .hierarchy
                .get_mut(&key)
                .ok_or_else(|| GraphError::RelationNotFound {
                    id: e.node_aggregate_id.clone(),
                    point: point.clone(),
                })?;
            if let Some(new_parent) = &e.new_parent_node_aggregate_id {
                relation.parent = Some(new_parent.clone());
            }
            self.reposition(point, &e.node_aggregate_id, sibling.node_aggregate_id.as_ref());
        }
        Ok(())
    }

    fn apply_removed(&mut self, e: &NodeAggregateWasRemoved) {
        let mut touched = BTreeSet::new();
        touched.insert(e.node_aggregate_id.clone());
        for point in &e.affected_covered_dimension_space_points {
            let descendants = self.descendants(&e.node_aggregate_id, point);
            self.hierarchy.remove(&relation_key(point, &e.node_aggregate_id));
            for descendant in descendants {
                self.hierarchy.remove(&relation_key(point, &descendant));
                touched.insert(descendant);
            }
        }
        for origin in &e.affected_occupied_dimension_space_points {
            let still_covering = self
                .hierarchy
                .values()
                .any(|r| r.child == e.node_aggregate_id && &r.child_origin == origin);
            if !still_covering {
                self.nodes.remove(&node_key(&e.node_aggregate_id, origin));
            }
        }
        let touched: Vec<NodeAggregateId> = touched.into_iter().collect();
        self.collect_garbage(&touched);
    }

    // -----------------------------------------------------------------------
    // Arena primitives
    // -----------------------------------------------------------------------

    fn insert_node(&mut self, node: NodeRecord) {
        let key = node_key(&node.node_aggregate_id, &node.origin_dimension_space_point);
        self.nodes.insert(key, node);
    }

    fn node_mut(
        &mut self,
        id: &NodeAggregateId,
        origin: &OriginDimensionSpacePoint,
    ) -> Result<&mut NodeRecord, GraphError> {
        self.nodes
            .get_mut(&node_key(id, origin))
            .ok_or_else(|| GraphError::NodeNotFound {
                id: id.clone(),
                origin: origin.clone(),
            })
    }

    fn attach(
        &mut self,
        point: &DimensionSpacePoint,
        parent: Option<&NodeAggregateId>,
        child: &NodeAggregateId,
        child_origin: &OriginDimensionSpacePoint,
        succeeding: Option<&NodeAggregateId>,
    ) {
        self.hierarchy.insert(
            relation_key(point, child),
            HierarchyRelation {
                dimension_space_point: point.clone(),
                parent: parent.cloned(),
                child: child.clone(),
                child_origin: child_origin.clone(),
                position: u32::MAX,
            },
        );
        self.reposition(point, child, succeeding);
    }

    /// Place `child` before `succeeding` among its siblings in `point`, or
    /// last if `succeeding` is not one of them. Positions are renumbered
    /// densely.
    fn reposition(
        &mut self,
        point: &DimensionSpacePoint,
        child: &NodeAggregateId,
        succeeding: Option<&NodeAggregateId>,
    ) {
        let Some(parent) = self.relation(point, child).map(|r| r.parent.clone()) else {
            return;
        };
        let mut order: Vec<NodeAggregateId> = self
            .child_relations(parent.as_ref(), point)
            .into_iter()
            .filter(|r| &r.child != child)
            .map(|r| r.child.clone())
            .collect();
        let index = succeeding
            .and_then(|s| order.iter().position(|c| c == s))
            .unwrap_or(order.len());
        order.insert(index, child.clone());
        for (position, id) in order.iter().enumerate() {
            if let Some(relation) = self.hierarchy.get_mut(&relation_key(point, id)) {
                relation.position = u32::try_from(position).unwrap_or(u32::MAX);
            }
        }
    }

    /// Drop variants of `ids` that no longer cover anything, and aggregates
    /// left without variants.
    fn collect_garbage(&mut self, ids: &[NodeAggregateId]) {
        for id in ids {
            let covering: BTreeSet<OriginDimensionSpacePoint> = self
                .hierarchy
                .values()
                .filter(|r| &r.child == id)
                .map(|r| r.child_origin.clone())
                .collect();
            let orphaned: Vec<String> = self
                .nodes_of(id)
                .filter(|n| !covering.contains(&n.origin_dimension_space_point))
                .map(|n| node_key(id, &n.origin_dimension_space_point))
                .collect();
            for key in orphaned {
                self.nodes.remove(&key);
            }
            if self.nodes_of(id).next().is_none() {
                self.aggregates.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::event::data::NodeAggregateNameWasChanged;
    use crate::model::{NodeName, PropertyName, PropertyValue};

    fn specialization(
        node: &str,
        from: &str,
        to: &str,
        covered: &[DimensionSpacePoint],
    ) -> EventData {
        EventData::NodeSpecializationVariantWasCreated(NodeVariantWasCreated {
            content_stream_id: cs(),
            node_aggregate_id: id(node),
            source_origin: origin(from),
            target_origin: origin(to),
            variant_succeeding_siblings: covered
                .iter()
                .map(|p| InterdimensionalSibling::new(p.clone(), None))
                .collect(),
        })
    }

    #[test]
    fn specialization_variant_takes_over_coverage_in_place() {
        let mut graph = two_pages();
        graph
            .apply(&specialization("a", "en", "de", &[lang("de")]))
            .expect("variant");

        let a = graph.node_aggregate(&id("a")).expect("a");
        assert_eq!(a.occupied.len(), 2);
        assert_eq!(a.origin_covering(&lang("de")), Some(&origin("de")));
        assert_eq!(a.origin_covering(&lang("en")), Some(&origin("en")));
        assert_eq!(
            graph.succeeding_siblings(&id("a"), &lang("de")),
            vec![id("b")],
            "position survives the variant"
        );
    }

    #[test]
    fn properties_are_set_per_origin() {
        let mut graph = two_pages();
        let title = PropertyName::new("title");
        let mut values = SerializedPropertyValues::new();
        values.insert(title.clone(), PropertyValue::String("Hello".into()));
        graph
            .apply(&EventData::NodePropertiesWereSet(NodePropertiesWereSet {
                content_stream_id: cs(),
                node_aggregate_id: id("a"),
                origin_dimension_space_point: origin("en"),
                affected_dimension_space_points: [lang("en"), lang("de")].into_iter().collect(),
                property_values: values,
                properties_to_unset: BTreeSet::new(),
            }))
            .expect("set");
        let node = graph.covering_node(&id("a"), &lang("de")).expect("node");
        assert_eq!(node.properties.get_str(&title), Ok("Hello"));

        let err = graph
            .apply(&EventData::NodePropertiesWereSet(NodePropertiesWereSet {
                content_stream_id: cs(),
                node_aggregate_id: id("a"),
                origin_dimension_space_point: origin("de"),
                affected_dimension_space_points: BTreeSet::new(),
                property_values: SerializedPropertyValues::new(),
                properties_to_unset: BTreeSet::new(),
            }))
            .expect_err("no de variant");
        assert!(matches!(err, GraphError::NodeNotFound { .. }));
    }

    #[test]
    fn move_before_sibling_renumbers_positions() {
        let mut graph = two_pages();
        graph
            .apply(&EventData::NodeAggregateWasMoved(NodeAggregateWasMoved {
                content_stream_id: cs(),
                node_aggregate_id: id("b"),
                new_parent_node_aggregate_id: None,
                succeeding_siblings_for_coverage: vec![InterdimensionalSibling::new(
                    lang("en"),
                    Some(id("a")),
                )],
            }))
            .expect("move");
        let en: Vec<_> = graph
            .child_relations(Some(&id("root")), &lang("en"))
            .into_iter()
            .map(|r| (r.child.clone(), r.position))
            .collect();
        assert_eq!(en, vec![(id("b"), 0), (id("a"), 1)]);
        let de: Vec<_> = graph
            .child_relations(Some(&id("root")), &lang("de"))
            .into_iter()
            .map(|r| r.child.clone())
            .collect();
        assert_eq!(de, vec![id("a"), id("b")], "other points are untouched");
    }

    #[test]
    fn removal_cascades_and_collects_orphans() {
        let mut graph = two_pages();
        graph
            .apply(&node_created("child", "a", &origin("en"), &[lang("en"), lang("de")], None))
            .expect("child");
        graph
            .apply(&EventData::NodeAggregateWasRemoved(NodeAggregateWasRemoved {
                content_stream_id: cs(),
                node_aggregate_id: id("a"),
                affected_occupied_dimension_space_points: BTreeSet::new(),
                affected_covered_dimension_space_points: [lang("de")].into_iter().collect(),
            }))
            .expect("remove de");

        assert!(graph.covering_node(&id("child"), &lang("de")).is_none());
        assert!(graph.covering_node(&id("child"), &lang("en")).is_some());

        graph
            .apply(&EventData::NodeAggregateWasRemoved(NodeAggregateWasRemoved {
                content_stream_id: cs(),
                node_aggregate_id: id("a"),
                affected_occupied_dimension_space_points: [origin("en")].into_iter().collect(),
                affected_covered_dimension_space_points: [lang("en")].into_iter().collect(),
            }))
            .expect("remove en");
        assert!(!graph.contains_aggregate(&id("a")));
        assert!(!graph.contains_aggregate(&id("child")));
        assert_eq!(graph.aggregate_count(), 2);
    }

    #[test]
    fn rename_requires_the_aggregate() {
        let mut graph = ContentGraph::new();
        let err = graph
            .apply(&EventData::NodeAggregateNameWasChanged(NodeAggregateNameWasChanged {
                content_stream_id: cs(),
                node_aggregate_id: id("ghost"),
                new_node_name: NodeName::new("x"),
            }))
            .expect_err("missing");
        assert_eq!(err, GraphError::AggregateNotFound(id("ghost")));
    }

    #[test]
    fn duplicate_creation_is_rejected() {
        let mut graph = two_pages();
        let err = graph
            .apply(&node_created("a", "root", &origin("en"), &[lang("en")], None))
            .expect_err("duplicate");
        assert_eq!(err, GraphError::AggregateAlreadyExists(id("a")));
    }
}
