//! The graph as seen from a single dimension space point.

use super::{ContentGraph, NodeRecord};
use crate::dimension::DimensionSpacePoint;
use crate::model::{NodeAggregateId, NodeName, NodeTypeName, ReferenceName};

/// A resolved reference from one node to another in the same point.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference<'a> {
    pub name: &'a ReferenceName,
    pub source: &'a NodeRecord,
    pub target: &'a NodeRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct ContentSubgraph<'a> {
    graph: &'a ContentGraph,
    point: &'a DimensionSpacePoint,
}

impl<'a> ContentSubgraph<'a> {
    #[must_use]
    pub const fn new(graph: &'a ContentGraph, point: &'a DimensionSpacePoint) -> Self {
        Self { graph, point }
    }

    #[must_use]
    pub const fn dimension_space_point(&self) -> &'a DimensionSpacePoint {
        self.point
    }

    #[must_use]
    pub fn find_node(&self, id: &NodeAggregateId) -> Option<&'a NodeRecord> {
        self.graph.covering_node(id, self.point)
    }

    #[must_use]
    pub fn find_root_node(&self, node_type_name: &NodeTypeName) -> Option<&'a NodeRecord> {
        let id = self.graph.root_aggregate_by_type(node_type_name)?;
        self.find_node(id)
    }

    #[must_use]
    pub fn find_parent_node(&self, id: &NodeAggregateId) -> Option<&'a NodeRecord> {
        let parent = self.graph.parent_of(id, self.point)?;
        self.find_node(parent)
    }

    /// Children in sibling order.
    #[must_use]
    pub fn find_child_nodes(&self, parent: &NodeAggregateId) -> Vec<&'a NodeRecord> {
        self.graph
            .child_relations(Some(parent), self.point)
            .into_iter()
            .filter_map(|r| self.graph.node(&r.child, &r.child_origin))
            .collect()
    }

    #[must_use]
    pub fn find_child_node_by_name(
        &self,
        parent: &NodeAggregateId,
        name: &NodeName,
    ) -> Option<&'a NodeRecord> {
        self.graph
            .child_relations(Some(parent), self.point)
            .into_iter()
            .find(|r| {
                self.graph
                    .aggregate_record(&r.child)
                    .is_some_and(|a| a.node_name.as_ref() == Some(name))
            })
            .and_then(|r| self.graph.node(&r.child, &r.child_origin))
    }

    #[must_use]
    pub fn find_succeeding_siblings(&self, id: &NodeAggregateId) -> Vec<&'a NodeRecord> {
        self.graph
            .succeeding_siblings(id, self.point)
            .iter()
            .filter_map(|s| self.find_node(s))
            .collect()
    }

    #[must_use]
    pub fn find_preceding_siblings(&self, id: &NodeAggregateId) -> Vec<&'a NodeRecord> {
        self.graph
            .preceding_siblings(id, self.point)
            .iter()
            .filter_map(|s| self.find_node(s))
            .collect()
    }

    /// Outgoing references whose targets are visible in this point.
    #[must_use]
    pub fn find_references(&self, source: &NodeAggregateId) -> Vec<Reference<'a>> {
        let Some(node) = self.find_node(source) else {
            return Vec::new();
        };
        node.references
            .iter()
            .flat_map(|(name, refs)| refs.iter().map(move |r| (name, r)))
            .filter_map(|(name, r)| {
                self.find_node(&r.target_node_aggregate_id).map(|target| Reference {
                    name,
                    source: node,
                    target,
                })
            })
            .collect()
    }

    /// Incoming references from nodes visible in this point.
    #[must_use]
    pub fn find_back_references(&self, target: &NodeAggregateId) -> Vec<Reference<'a>> {
        let Some(target_node) = self.find_node(target) else {
            return Vec::new();
        };
        let point = self.point;
        let graph = self.graph;
        graph
            .relations()
            .filter(|r| &r.dimension_space_point == point)
            .filter_map(|r| graph.node(&r.child, &r.child_origin))
            .flat_map(move |source| {
                source.references.iter().flat_map(move |(name, refs)| {
                    refs.iter()
                        .filter(move |r| &r.target_node_aggregate_id == target)
                        .map(move |_| Reference {
                            name,
                            source,
                            target: target_node,
                        })
                })
            })
            .collect()
    }

    /// Nodes below `id`, depth first.
    #[must_use]
    pub fn find_descendants(&self, id: &NodeAggregateId) -> Vec<&'a NodeRecord> {
        self.graph
            .descendants(id, self.point)
            .iter()
            .filter_map(|d| self.find_node(d))
            .collect()
    }

    #[must_use]
    pub fn count_nodes(&self) -> usize {
        self.graph
            .relations()
            .filter(|r| &r.dimension_space_point == self.point)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::event::EventData;
    use crate::event::data::{NodeReferencesWereSet, SerializedNodeReference};
    use crate::model::{NodeName, ReferenceName, SerializedPropertyValues};

    #[test]
    fn subgraph_navigation() {
        let graph = two_pages();
        let de = lang("de");
        let sub = graph.subgraph(&de);

        let children: Vec<_> = sub
            .find_child_nodes(&id("root"))
            .iter()
            .map(|n| n.node_aggregate_id.clone())
            .collect();
        assert_eq!(children, vec![id("a"), id("b")]);
        assert_eq!(
            sub.find_parent_node(&id("a")).map(|n| n.node_aggregate_id.clone()),
            Some(id("root"))
        );
        assert!(sub.find_child_node_by_name(&id("root"), &NodeName::new("b")).is_some());
        assert_eq!(sub.find_succeeding_siblings(&id("a")).len(), 1);
        assert_eq!(sub.count_nodes(), 3);
    }

    #[test]
    fn references_resolve_in_both_directions() {
        let mut graph = two_pages();
        graph
            .apply(&EventData::NodeReferencesWereSet(NodeReferencesWereSet {
                content_stream_id: cs(),
                node_aggregate_id: id("a"),
                affected_source_origin_dimension_space_points: [origin("en")].into_iter().collect(),
                reference_name: ReferenceName::new("related"),
                references: vec![SerializedNodeReference {
                    target_node_aggregate_id: id("b"),
                    properties: SerializedPropertyValues::new(),
                }],
            }))
            .expect("refs");
        let en = lang("en");
        let sub = graph.subgraph(&en);
        let out = sub.find_references(&id("a"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target.node_aggregate_id, id("b"));
        let back = sub.find_back_references(&id("b"));
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].source.node_aggregate_id, id("a"));
    }
}
