//! Precondition checks shared by the command handlers.
//!
//! Each check returns the specific [`CommandError`] of the invariant it
//! guards. Handlers call them in a fixed order, so the first violated
//! invariant decides the error.

use std::collections::BTreeSet;

use crate::config::ContentModel;
use crate::dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};
use crate::graph::{ContentGraph, NodeAggregate};
use crate::model::{
    ContentStreamId, ContentStreamState, NodeAggregateId, NodeName, NodeType, NodeTypeName,
    PropertyError, PropertyName, PropertyValue, SerializedPropertyValues,
};
use crate::model::node_type::PropertyDeclaration;
use crate::projection::content_stream::ContentStreamRecord;
use crate::store::{ExpectedVersion, StreamName, Version};

use super::{CommandError, ContentStreamLookup};

// ---------------------------------------------------------------------------
// Content streams
// ---------------------------------------------------------------------------

/// The registry entry of a stream that exists and was not removed.
pub fn require_content_stream(
    lookup: &dyn ContentStreamLookup,
    id: &ContentStreamId,
) -> Result<ContentStreamRecord, CommandError> {
    lookup
        .content_stream(id)?
        .filter(|record| !record.removed)
        .ok_or_else(|| CommandError::ContentStreamDoesNotExistYet(id.clone()))
}

/// Like [`require_content_stream`], and the stream must accept writes.
pub fn require_writable_content_stream(
    lookup: &dyn ContentStreamLookup,
    id: &ContentStreamId,
) -> Result<ContentStreamRecord, CommandError> {
    let record = require_content_stream(lookup, id)?;
    if record.state == ContentStreamState::Closed {
        return Err(CommandError::ContentStreamIsClosed(id.clone()));
    }
    Ok(record)
}

/// Registry entry and graph of a writable stream.
///
/// The returned record carries the version the graph reflects, so events
/// decided against the graph are only appended if the stream has not moved
/// past it. A graph that has not caught up yet is a retryable conflict.
pub fn load_writable(
    lookup: &dyn ContentStreamLookup,
    id: &ContentStreamId,
) -> Result<(ContentStreamRecord, ContentGraph), CommandError> {
    let mut record = require_writable_content_stream(lookup, id)?;
    let graph = lookup.content_graph(id)?;
    let graph_version = lookup.content_graph_version(id)?;
    if graph_version != Some(record.version) {
        tracing::warn!(
            content_stream = %id,
            stream_version = record.version.value(),
            graph_version = ?graph_version.map(Version::value),
            "content graph disagrees with the content stream registry"
        );
        record.version = graph_version.ok_or_else(|| CommandError::ConcurrencyConflict {
            stream: StreamName::for_content_stream(id),
            expected: ExpectedVersion::Exact(record.version),
            actual: None,
        })?;
    }
    Ok((record, graph))
}

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

pub fn require_node_type<'m>(
    model: &'m ContentModel,
    name: &NodeTypeName,
) -> Result<&'m NodeType, CommandError> {
    model
        .node_types
        .get(name)
        .ok_or_else(|| CommandError::NodeTypeNotFound(name.clone()))
}

pub fn require_not_abstract(node_type: &NodeType) -> Result<(), CommandError> {
    if node_type.is_abstract {
        return Err(CommandError::NodeTypeIsAbstract(node_type.name.clone()));
    }
    Ok(())
}

pub fn require_root_type(node_type: &NodeType) -> Result<(), CommandError> {
    if !node_type.is_root() {
        return Err(CommandError::NodeTypeIsNotOfTypeRoot(node_type.name.clone()));
    }
    Ok(())
}

pub fn require_not_root_type(node_type: &NodeType) -> Result<(), CommandError> {
    if node_type.is_root() {
        return Err(CommandError::NodeTypeIsOfTypeRoot(node_type.name.clone()));
    }
    Ok(())
}

/// Every tethered descendant type must be declared and concrete.
pub fn require_tethered_types(
    model: &ContentModel,
    node_type: &NodeType,
) -> Result<(), CommandError> {
    let mut seen = BTreeSet::new();
    let mut pending: Vec<&NodeType> = vec![node_type];
    while let Some(current) = pending.pop() {
        if !seen.insert(current.name.clone()) {
            continue;
        }
        for child_type_name in current.tethered.values() {
            let child_type = require_node_type(model, child_type_name)?;
            require_not_abstract(child_type)?;
            pending.push(child_type);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

pub fn require_aggregate(
    graph: &ContentGraph,
    id: &NodeAggregateId,
) -> Result<NodeAggregate, CommandError> {
    graph
        .node_aggregate(id)
        .ok_or_else(|| CommandError::NodeAggregateCurrentlyDoesNotExist(id.clone()))
}

pub fn require_no_aggregate(
    graph: &ContentGraph,
    id: &NodeAggregateId,
) -> Result<(), CommandError> {
    if graph.contains_aggregate(id) {
        return Err(CommandError::NodeAggregateCurrentlyExists(id.clone()));
    }
    Ok(())
}

pub fn require_not_root(aggregate: &NodeAggregate) -> Result<(), CommandError> {
    if aggregate.is_root() {
        return Err(CommandError::NodeAggregateIsRoot(aggregate.id.clone()));
    }
    Ok(())
}

pub fn require_root(aggregate: &NodeAggregate) -> Result<(), CommandError> {
    if !aggregate.is_root() {
        return Err(CommandError::NodeAggregateIsNotRoot(aggregate.id.clone()));
    }
    Ok(())
}

pub fn require_not_tethered(aggregate: &NodeAggregate) -> Result<(), CommandError> {
    if aggregate.is_tethered() {
        return Err(CommandError::NodeAggregateIsTethered(aggregate.id.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dimensions
// ---------------------------------------------------------------------------

pub fn require_allowed_point(
    model: &ContentModel,
    point: &DimensionSpacePoint,
) -> Result<(), CommandError> {
    model.variation_graph.require_allowed(point)?;
    Ok(())
}

pub fn require_covers(
    aggregate: &NodeAggregate,
    point: &DimensionSpacePoint,
) -> Result<(), CommandError> {
    if !aggregate.covers(point) {
        return Err(CommandError::NodeAggregateDoesCurrentlyNotCoverDimensionSpacePoint {
            id: aggregate.id.clone(),
            point: point.clone(),
        });
    }
    Ok(())
}

pub fn require_covers_all(
    aggregate: &NodeAggregate,
    points: &DimensionSpacePointSet,
) -> Result<(), CommandError> {
    points.iter().try_for_each(|p| require_covers(aggregate, p))
}

pub fn require_occupied(
    aggregate: &NodeAggregate,
    origin: &OriginDimensionSpacePoint,
) -> Result<(), CommandError> {
    if !aggregate.occupies(origin) {
        return Err(CommandError::DimensionSpacePointIsNotYetOccupied {
            id: aggregate.id.clone(),
            origin: origin.clone(),
        });
    }
    Ok(())
}

pub fn require_not_occupied(
    aggregate: &NodeAggregate,
    origin: &OriginDimensionSpacePoint,
) -> Result<(), CommandError> {
    if aggregate.occupies(origin) {
        return Err(CommandError::DimensionSpacePointIsAlreadyOccupied {
            id: aggregate.id.clone(),
            origin: origin.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Names and constraints
// ---------------------------------------------------------------------------

pub fn require_name_not_covered(
    graph: &ContentGraph,
    parent: &NodeAggregateId,
    name: &NodeName,
    points: &DimensionSpacePointSet,
    except: Option<&NodeAggregateId>,
) -> Result<(), CommandError> {
    if graph.is_name_covered(parent, name, points, except) {
        return Err(CommandError::NodeNameIsAlreadyCovered {
            parent: parent.clone(),
            name: name.clone(),
        });
    }
    Ok(())
}

/// A regular child may not take the name of one of the parent's tethered
/// children.
pub fn require_name_not_reserved(
    parent: &NodeAggregate,
    parent_type: &NodeType,
    name: &NodeName,
) -> Result<(), CommandError> {
    if parent_type.tethered.contains_key(name) {
        return Err(CommandError::NodeNameIsReservedForTetheredChild {
            parent: parent.id.clone(),
            name: name.clone(),
        });
    }
    Ok(())
}

/// The parent's type must allow `child_type`; below a tethered parent the
/// grandparent's constraints for that tethered child apply as well.
pub fn require_child_allowed(
    model: &ContentModel,
    graph: &ContentGraph,
    parent: &NodeAggregate,
    child_type: &NodeType,
) -> Result<(), CommandError> {
    let violation = || CommandError::NodeConstraintViolation {
        parent: parent.id.clone(),
        child: child_type.name.clone(),
    };
    let parent_type = require_node_type(model, &parent.node_type_name)?;
    if !parent_type.allows_child(child_type) {
        return Err(violation());
    }
    if let (true, Some(tethered_name)) = (parent.is_tethered(), parent.node_name.as_ref()) {
        for grandparent in graph.parent_aggregate_ids(&parent.id) {
            let Some(grandparent_type) = graph
                .aggregate_record(&grandparent)
                .and_then(|record| model.node_types.get(&record.node_type_name))
            else {
                continue;
            };
            if grandparent_type.tethered.contains_key(tethered_name)
                && !grandparent_type.allows_grandchild(tethered_name, child_type)
            {
                return Err(violation());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

pub fn check_value(
    name: &PropertyName,
    declaration: &PropertyDeclaration,
    value: &PropertyValue,
) -> Result<(), PropertyError> {
    if declaration.property_type.accepts(value) {
        Ok(())
    } else {
        Err(PropertyError::TypeMismatch {
            property: name.clone(),
            expected: declaration.property_type,
            actual: value.kind(),
        })
    }
}

/// Every value must be declared by `node_type` and match its declared type.
pub fn require_valid_properties(
    node_type: &NodeType,
    values: &SerializedPropertyValues,
) -> Result<(), CommandError> {
    for (name, value) in values.iter() {
        let declaration = require_property_declared(node_type, name)?;
        check_value(name, declaration, value)?;
    }
    Ok(())
}

pub fn require_property_declared<'t>(
    node_type: &'t NodeType,
    name: &PropertyName,
) -> Result<&'t PropertyDeclaration, CommandError> {
    node_type
        .property(name)
        .ok_or_else(|| CommandError::PropertyNotDeclared {
            node_type: node_type.name.clone(),
            property: name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{FakeLookup, model};
    use crate::graph::test_support::{cs, id, lang, two_pages};
    use crate::store::Version;

    #[test]
    fn writes_are_guarded_by_the_version_the_graph_has_seen() {
        let mut lookup = FakeLookup::with_graph(two_pages());
        lookup.streams.get_mut(&cs()).expect("record").version = Version::new(9);
        lookup.graph_versions.insert(cs(), Version::new(4));

        let (record, graph) = load_writable(&lookup, &cs()).expect("writable");
        assert_eq!(record.version, Version::new(4));
        assert!(graph.contains_aggregate(&id("a")));

        lookup.graphs.clear();
        lookup.graph_versions.clear();
        lookup.streams.insert(cs(), ContentStreamRecord::new(cs(), Version::new(2)));
        let fake = NoGraphYet(lookup);
        let err = load_writable(&fake, &cs()).expect_err("graph not projected");
        assert!(matches!(err, CommandError::ConcurrencyConflict { actual: None, .. }));
        assert!(err.is_retryable());
    }

    /// A lookup whose graph projection has not seen the stream yet.
    struct NoGraphYet(FakeLookup);

    impl ContentStreamLookup for NoGraphYet {
        fn content_stream(
            &self,
            id: &ContentStreamId,
        ) -> Result<Option<ContentStreamRecord>, CommandError> {
            self.0.content_stream(id)
        }

        fn is_in_use(&self, id: &ContentStreamId) -> Result<bool, CommandError> {
            self.0.is_in_use(id)
        }

        fn content_graph(&self, id: &ContentStreamId) -> Result<ContentGraph, CommandError> {
            self.0.content_graph(id)
        }

        fn content_graph_version(
            &self,
            _id: &ContentStreamId,
        ) -> Result<Option<Version>, CommandError> {
            Ok(None)
        }
    }

    #[test]
    fn closed_and_removed_streams_reject_writes() {
        let mut lookup = FakeLookup::with_graph(two_pages());
        assert!(require_writable_content_stream(&lookup, &cs()).is_ok());

        let record = lookup.streams.get_mut(&cs()).expect("record");
        record.state = ContentStreamState::Closed;
        assert!(matches!(
            require_writable_content_stream(&lookup, &cs()),
            Err(CommandError::ContentStreamIsClosed(_))
        ));

        let mut removed = ContentStreamRecord::new(cs(), Version::new(3));
        removed.removed = true;
        lookup.streams.insert(cs(), removed);
        assert!(matches!(
            require_content_stream(&lookup, &cs()),
            Err(CommandError::ContentStreamDoesNotExistYet(_))
        ));
    }

    #[test]
    fn abstract_and_root_types_are_classified() {
        let model = model();
        let document =
            require_node_type(&model, &NodeTypeName::new("acme:Document")).expect("type");
        assert!(matches!(require_not_abstract(document), Err(CommandError::NodeTypeIsAbstract(_))));
        let sites = require_node_type(&model, &NodeTypeName::new("acme:Sites")).expect("type");
        assert!(require_root_type(sites).is_ok());
        assert!(require_not_root_type(sites).is_err());
        assert!(matches!(
            require_node_type(&model, &NodeTypeName::new("acme:Missing")),
            Err(CommandError::NodeTypeNotFound(_))
        ));
    }

    #[test]
    fn coverage_and_names_are_checked() {
        let graph = two_pages();
        let a = require_aggregate(&graph, &id("a")).expect("a");
        assert!(require_covers(&a, &lang("de")).is_ok());
        assert!(require_covers(&a, &lang("fr")).is_err());
        assert!(matches!(
            require_name_not_covered(
                &graph,
                &id("root"),
                &NodeName::new("b"),
                &a.covered,
                Some(&id("a")),
            ),
            Err(CommandError::NodeNameIsAlreadyCovered { .. })
        ));
        assert!(
            require_name_not_covered(
                &graph,
                &id("root"),
                &NodeName::new("a"),
                &a.covered,
                Some(&id("a")),
            )
            .is_ok()
        );
    }

    #[test]
    fn property_values_must_match_declarations() {
        let model = model();
        let page = require_node_type(&model, &NodeTypeName::new("acme:Page")).expect("page");
        let mut values = SerializedPropertyValues::new();
        values.insert(PropertyName::new("title"), PropertyValue::Int(3));
        assert!(matches!(
            require_valid_properties(page, &values),
            Err(CommandError::Property(PropertyError::TypeMismatch { .. }))
        ));

        let mut undeclared = SerializedPropertyValues::new();
        undeclared.insert(PropertyName::new("color"), PropertyValue::String("red".into()));
        assert!(matches!(
            require_valid_properties(page, &undeclared),
            Err(CommandError::PropertyNotDeclared { .. })
        ));
    }
}
