//! Content graph read model.
//!
//! # Overview
//!
//! A [`ContentGraph`] is the materialized state of one content stream. It is
//! an arena of three tables:
//!
//! - **aggregates**: identity-level facts (classification, node type, name)
//!   keyed by [`NodeAggregateId`]
//! - **nodes**: one variant per `(aggregate id, origin)`, holding properties
//!   and references
//! - **hierarchy**: one relation per `(covered point, child aggregate)`,
//!   naming the parent aggregate, the variant that covers the point, and the
//!   position among siblings
//!
//! Coverage is never stored on the aggregate; it is whatever the hierarchy
//! table says. Each table is a `BTreeMap`, so the serialized form is
//! deterministic and replaying the same events yields byte-identical JSON.
//!
//! The graph is a projection: it is built by [`ContentGraph::apply`] and
//! never written to directly by command handlers. Forking a content stream
//! clones the arena.

#![allow(clippy::must_use_candidate)]

pub mod apply;
pub mod integrity;
pub mod subgraph;

pub use apply::GraphError;
pub use integrity::{Adjustment, AdjustmentKind, check_integrity};
pub use subgraph::ContentSubgraph;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint,
    OriginDimensionSpacePointSet,
};
use crate::event::data::SerializedNodeReference;
use crate::model::{
    NodeAggregateClassification, NodeAggregateId, NodeName, NodeTypeName, ReferenceName,
    SerializedPropertyValues,
};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub classification: NodeAggregateClassification,
    pub node_type_name: NodeTypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<NodeName>,
}

/// One variant of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_aggregate_id: NodeAggregateId,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub node_type_name: NodeTypeName,
    pub properties: SerializedPropertyValues,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<ReferenceName, Vec<SerializedNodeReference>>,
}

/// Edge from a parent aggregate to a child variant in one covered point.
///
/// Root aggregates have relations without a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyRelation {
    pub dimension_space_point: DimensionSpacePoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeAggregateId>,
    pub child: NodeAggregateId,
    pub child_origin: OriginDimensionSpacePoint,
    pub position: u32,
}

pub(crate) fn node_key(id: &NodeAggregateId, origin: &OriginDimensionSpacePoint) -> String {
    format!("{id}@{}", origin.content_hash())
}

pub(crate) fn relation_key(point: &DimensionSpacePoint, child: &NodeAggregateId) -> String {
    format!("{}/{child}", point.content_hash())
}

// ---------------------------------------------------------------------------
// NodeAggregate read model
// ---------------------------------------------------------------------------

/// Everything known about one aggregate, assembled from the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAggregate {
    pub id: NodeAggregateId,
    pub classification: NodeAggregateClassification,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    /// Origins with a materialized variant.
    pub occupied: OriginDimensionSpacePointSet,
    /// Points covered by any variant.
    pub covered: DimensionSpacePointSet,
    /// Covered points per variant.
    pub coverage_by_origin: BTreeMap<OriginDimensionSpacePoint, DimensionSpacePointSet>,
}

impl NodeAggregate {
    pub fn occupies(&self, origin: &OriginDimensionSpacePoint) -> bool {
        self.occupied.contains(origin)
    }

    pub fn covers(&self, point: &DimensionSpacePoint) -> bool {
        self.covered.contains(point)
    }

    pub fn coverage_of(&self, origin: &OriginDimensionSpacePoint) -> DimensionSpacePointSet {
        self.coverage_by_origin.get(origin).cloned().unwrap_or_default()
    }

    /// The origin of the variant covering `point`.
    pub fn origin_covering(
        &self,
        point: &DimensionSpacePoint,
    ) -> Option<&OriginDimensionSpacePoint> {
        self.coverage_by_origin
            .iter()
            .find(|(_, covered)| covered.contains(point))
            .map(|(origin, _)| origin)
    }

    pub const fn is_root(&self) -> bool {
        matches!(self.classification, NodeAggregateClassification::Root)
    }

    pub const fn is_tethered(&self) -> bool {
        matches!(self.classification, NodeAggregateClassification::Tethered)
    }

    /// Occupied origins as plain points.
    pub fn occupied_points(&self) -> DimensionSpacePointSet {
        self.occupied.iter().map(OriginDimensionSpacePoint::to_point).collect()
    }
}

// ---------------------------------------------------------------------------
// ContentGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGraph {
    aggregates: BTreeMap<NodeAggregateId, AggregateRecord>,
    nodes: BTreeMap<String, NodeRecord>,
    hierarchy: BTreeMap<String, HierarchyRelation>,
}

impl ContentGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic JSON form used for storage.
    ///
    /// # Errors
    ///
    /// Returns the serialization error; cannot happen for well-formed graphs.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// # Errors
    ///
    /// Returns the deserialization error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn aggregate_record(&self, id: &NodeAggregateId) -> Option<&AggregateRecord> {
        self.aggregates.get(id)
    }

    pub fn aggregate_records(&self) -> impl Iterator<Item = (&NodeAggregateId, &AggregateRecord)> {
        self.aggregates.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &HierarchyRelation> {
        self.hierarchy.values()
    }

    pub fn contains_aggregate(&self, id: &NodeAggregateId) -> bool {
        self.aggregates.contains_key(id)
    }

    /// Assemble the read model of one aggregate.
    pub fn node_aggregate(&self, id: &NodeAggregateId) -> Option<NodeAggregate> {
        let record = self.aggregates.get(id)?;
        let occupied: OriginDimensionSpacePointSet = self
            .nodes_of(id)
            .map(|n| n.origin_dimension_space_point.clone())
            .collect();
        let mut coverage_by_origin: BTreeMap<OriginDimensionSpacePoint, DimensionSpacePointSet> =
            BTreeMap::new();
        for relation in self.hierarchy.values().filter(|r| &r.child == id) {
            coverage_by_origin
                .entry(relation.child_origin.clone())
                .or_default()
                .insert(relation.dimension_space_point.clone());
        }
        let covered = coverage_by_origin.values().flatten().cloned().collect();
        Some(NodeAggregate {
            id: id.clone(),
            classification: record.classification,
            node_type_name: record.node_type_name.clone(),
            node_name: record.node_name.clone(),
            occupied,
            covered,
            coverage_by_origin,
        })
    }

    /// Variants of `id`, ordered by origin hash.
    pub fn nodes_of<'a>(
        &'a self,
        id: &NodeAggregateId,
    ) -> impl Iterator<Item = &'a NodeRecord> + use<'a> {
        let prefix = format!("{id}@");
        self.nodes
            .range(prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .map(|(_, node)| node)
    }

    pub fn node(
        &self,
        id: &NodeAggregateId,
        origin: &OriginDimensionSpacePoint,
    ) -> Option<&NodeRecord> {
        self.nodes.get(&node_key(id, origin))
    }

    pub fn relation(
        &self,
        point: &DimensionSpacePoint,
        child: &NodeAggregateId,
    ) -> Option<&HierarchyRelation> {
        self.hierarchy.get(&relation_key(point, child))
    }

    /// The variant of `id` visible in `point`.
    pub fn covering_node(
        &self,
        id: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> Option<&NodeRecord> {
        let relation = self.relation(point, id)?;
        self.node(id, &relation.child_origin)
    }

    /// Parent aggregate of `id` in `point`; `None` for roots and uncovered points.
    pub fn parent_of(
        &self,
        id: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> Option<&NodeAggregateId> {
        self.relation(point, id).and_then(|r| r.parent.as_ref())
    }

    /// Parent aggregates of `id` across all covered points.
    pub fn parent_aggregate_ids(&self, id: &NodeAggregateId) -> BTreeSet<NodeAggregateId> {
        self.hierarchy
            .values()
            .filter(|r| &r.child == id)
            .filter_map(|r| r.parent.clone())
            .collect()
    }

    /// Child relations of `parent` in `point`, ordered by position.
    pub fn child_relations(
        &self,
        parent: Option<&NodeAggregateId>,
        point: &DimensionSpacePoint,
    ) -> Vec<&HierarchyRelation> {
        let mut children: Vec<&HierarchyRelation> = self
            .hierarchy
            .values()
            .filter(|r| r.parent.as_ref() == parent && &r.dimension_space_point == point)
            .collect();
        children.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.child.cmp(&b.child)));
        children
    }

    /// Child aggregates of `parent` across all points.
    pub fn child_aggregate_ids(&self, parent: &NodeAggregateId) -> BTreeSet<NodeAggregateId> {
        self.hierarchy
            .values()
            .filter(|r| r.parent.as_ref() == Some(parent))
            .map(|r| r.child.clone())
            .collect()
    }

    pub fn tethered_child_aggregate_ids(&self, parent: &NodeAggregateId) -> Vec<NodeAggregateId> {
        self.child_aggregate_ids(parent)
            .into_iter()
            .filter(|child| {
                self.aggregates
                    .get(child)
                    .is_some_and(|a| a.classification == NodeAggregateClassification::Tethered)
            })
            .collect()
    }

    /// Child aggregate of `parent` named `name`, in any point.
    pub fn child_aggregate_by_name(
        &self,
        parent: &NodeAggregateId,
        name: &NodeName,
    ) -> Option<NodeAggregateId> {
        self.child_aggregate_ids(parent)
            .into_iter()
            .find(|child| {
                self.aggregates
                    .get(child)
                    .is_some_and(|a| a.node_name.as_ref() == Some(name))
            })
    }

    /// Whether a child of `parent` other than `except` is named `name` in any
    /// of `points`.
    pub fn is_name_covered(
        &self,
        parent: &NodeAggregateId,
        name: &NodeName,
        points: &DimensionSpacePointSet,
        except: Option<&NodeAggregateId>,
    ) -> bool {
        self.hierarchy.values().any(|r| {
            r.parent.as_ref() == Some(parent)
                && Some(&r.child) != except
                && points.contains(&r.dimension_space_point)
                && self
                    .aggregates
                    .get(&r.child)
                    .is_some_and(|a| a.node_name.as_ref() == Some(name))
        })
    }

    /// Siblings after `id` under its parent in `point`, nearest first.
    pub fn succeeding_siblings(
        &self,
        id: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> Vec<NodeAggregateId> {
        let Some(relation) = self.relation(point, id) else {
            return Vec::new();
        };
        self.child_relations(relation.parent.as_ref(), point)
            .into_iter()
            .skip_while(|r| &r.child != id)
            .skip(1)
            .map(|r| r.child.clone())
            .collect()
    }

    /// Siblings before `id` under its parent in `point`, nearest first.
    pub fn preceding_siblings(
        &self,
        id: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> Vec<NodeAggregateId> {
        let Some(relation) = self.relation(point, id) else {
            return Vec::new();
        };
        let mut before: Vec<NodeAggregateId> = self
            .child_relations(relation.parent.as_ref(), point)
            .into_iter()
            .take_while(|r| &r.child != id)
            .map(|r| r.child.clone())
            .collect();
        before.reverse();
        before
    }

    /// Whether `candidate` is `ancestor` or below it in `point`.
    pub fn is_descendant_or_self(
        &self,
        candidate: &NodeAggregateId,
        ancestor: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> bool {
        let mut current = Some(candidate.clone());
        let mut steps = 0usize;
        while let Some(id) = current {
            if &id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.aggregates.len() {
                return false;
            }
            current = self.parent_of(&id, point).cloned();
        }
        false
    }

    /// Descendant aggregates of `id` in `point`, depth first.
    pub fn descendants(
        &self,
        id: &NodeAggregateId,
        point: &DimensionSpacePoint,
    ) -> Vec<NodeAggregateId> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([id.clone()]);
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if &current != id {
                out.push(current.clone());
            }
            // Reversed so the first sibling is popped first.
            for relation in self.child_relations(Some(&current), point).into_iter().rev() {
                if seen.insert(relation.child.clone()) {
                    stack.push(relation.child.clone());
                }
            }
        }
        out
    }

    pub fn root_aggregate_by_type(
        &self,
        node_type_name: &NodeTypeName,
    ) -> Option<&NodeAggregateId> {
        self.aggregates
            .iter()
            .find(|(_, a)| {
                a.classification == NodeAggregateClassification::Root
                    && &a.node_type_name == node_type_name
            })
            .map(|(id, _)| id)
    }

    /// Read-only view of the graph as seen from one point.
    pub const fn subgraph<'a>(&'a self, point: &'a DimensionSpacePoint) -> ContentSubgraph<'a> {
        ContentSubgraph::new(self, point)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders shared by the graph and command tests.

    use super::*;
    use crate::event::data::{
        InterdimensionalSibling, NodeAggregateWithNodeWasCreated,
        RootNodeAggregateWithNodeWasCreated,
    };
    use crate::event::EventData;
    use crate::model::ContentStreamId;

    pub fn cs() -> ContentStreamId {
        ContentStreamId::new_unchecked("cs")
    }

    pub fn id(raw: &str) -> NodeAggregateId {
        NodeAggregateId::new_unchecked(raw)
    }

    pub fn lang(value: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::from_pairs([("language", value)])
    }

    pub fn origin(value: &str) -> OriginDimensionSpacePoint {
        OriginDimensionSpacePoint::from_pairs([("language", value)])
    }

    pub fn root_created(root: &str, points: &[DimensionSpacePoint]) -> EventData {
        EventData::RootNodeAggregateWithNodeWasCreated(RootNodeAggregateWithNodeWasCreated {
            content_stream_id: cs(),
            node_aggregate_id: id(root),
            node_type_name: NodeTypeName::root(),
            covered_dimension_space_points: points.iter().cloned().collect(),
            node_aggregate_classification: NodeAggregateClassification::Root,
        })
    }

    pub fn node_created(
        node: &str,
        parent: &str,
        at: &OriginDimensionSpacePoint,
        covered: &[DimensionSpacePoint],
        name: Option<&str>,
    ) -> EventData {
        EventData::NodeAggregateWithNodeWasCreated(NodeAggregateWithNodeWasCreated {
            content_stream_id: cs(),
            node_aggregate_id: id(node),
            node_type_name: NodeTypeName::new("acme:Page"),
            origin_dimension_space_point: at.clone(),
            succeeding_siblings_for_coverage: covered
                .iter()
                .map(|p| InterdimensionalSibling::new(p.clone(), None))
                .collect(),
            parent_node_aggregate_id: id(parent),
            node_name: name.map(NodeName::new),
            initial_property_values: SerializedPropertyValues::new(),
            node_aggregate_classification: NodeAggregateClassification::Regular,
        })
    }

    /// `root` covering en and de, with `a` and `b` created at en.
    pub fn two_pages() -> ContentGraph {
        let mut graph = ContentGraph::new();
        for event in [
            root_created("root", &[lang("en"), lang("de")]),
            node_created("a", "root", &origin("en"), &[lang("en"), lang("de")], Some("a")),
            node_created("b", "root", &origin("en"), &[lang("en"), lang("de")], Some("b")),
        ] {
            graph.apply(&event).expect("apply");
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn aggregate_read_model_reports_coverage_by_origin() {
        let graph = two_pages();
        let a = graph.node_aggregate(&id("a")).expect("a");
        assert_eq!(a.occupied.len(), 1);
        assert!(a.covers(&lang("de")));
        assert_eq!(a.origin_covering(&lang("de")), Some(&origin("en")));
        assert_eq!(a.coverage_of(&origin("en")).len(), 2);
        assert!(!a.is_root());
    }

    #[test]
    fn siblings_follow_creation_order() {
        let graph = two_pages();
        assert_eq!(graph.succeeding_siblings(&id("a"), &lang("de")), vec![id("b")]);
        assert_eq!(graph.preceding_siblings(&id("b"), &lang("de")), vec![id("a")]);
        assert!(graph.succeeding_siblings(&id("b"), &lang("de")).is_empty());
    }

    #[test]
    fn descendant_walk_stops_at_roots() {
        let graph = two_pages();
        assert!(graph.is_descendant_or_self(&id("a"), &id("root"), &lang("en")));
        assert!(!graph.is_descendant_or_self(&id("root"), &id("a"), &lang("en")));
        assert_eq!(graph.descendants(&id("root"), &lang("en")), vec![id("a"), id("b")]);
    }

    #[test]
    fn descendants_are_listed_in_pre_order() {
        let mut graph = two_pages();
        let both = [lang("en"), lang("de")];
        for event in [
            node_created("a1", "a", &origin("en"), &both, Some("a1")),
            node_created("a2", "a", &origin("en"), &both, Some("a2")),
            node_created("a11", "a1", &origin("en"), &both, Some("a11")),
        ] {
            graph.apply(&event).expect("apply");
        }
        assert_eq!(
            graph.descendants(&id("root"), &lang("de")),
            vec![id("a"), id("a1"), id("a11"), id("a2"), id("b")]
        );
        assert_eq!(graph.descendants(&id("a1"), &lang("de")), vec![id("a11")]);
    }

    #[test]
    fn name_coverage_ignores_the_renamed_aggregate() {
        let graph = two_pages();
        let points: DimensionSpacePointSet = [lang("en")].into_iter().collect();
        let name = NodeName::new("a");
        assert!(graph.is_name_covered(&id("root"), &name, &points, None));
        assert!(!graph.is_name_covered(&id("root"), &name, &points, Some(&id("a"))));
    }

    #[test]
    fn json_form_round_trips() {
        let graph = two_pages();
        let json = graph.to_json().expect("encode");
        let back = ContentGraph::from_json(&json).expect("decode");
        assert_eq!(back, graph);
        assert_eq!(back.to_json().expect("encode again"), json);
    }
}
