//! Property, reference and name changes on existing aggregates.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ContentModel;
use crate::dimension::{OriginDimensionSpacePoint, VariantType};
use crate::event::EventData;
use crate::event::data::{
    NodeAggregateNameWasChanged, NodePropertiesWereSet, NodeReferencesWereSet,
    SerializedNodeReference,
};
use crate::graph::NodeAggregate;
use crate::model::{PropertyName, PropertyScope, SerializedPropertyValues};

use super::checks::{
    check_value, load_writable, require_aggregate, require_allowed_point, require_covers,
    require_name_not_covered, require_name_not_reserved, require_node_type, require_not_root,
    require_not_tethered, require_occupied, require_property_declared,
};
use super::{
    ChangeNodeAggregateName, CommandError, ContentStreamLookup, EventsToPublish, SetNodeProperties,
    SetNodeReferences,
};

/// Origins of `aggregate` a write at `origin` reaches under `scope`.
fn scope_origins(
    model: &ContentModel,
    aggregate: &NodeAggregate,
    origin: &OriginDimensionSpacePoint,
    scope: PropertyScope,
) -> BTreeSet<OriginDimensionSpacePoint> {
    match scope {
        PropertyScope::Node => BTreeSet::from([origin.clone()]),
        PropertyScope::Specializations => aggregate
            .occupied
            .iter()
            .filter(|o| {
                *o == origin
                    || model.variation_graph.variant_type(o.as_point(), origin.as_point())
                        == VariantType::Specialization
            })
            .cloned()
            .collect(),
        PropertyScope::NodeAggregate => aggregate.occupied.clone(),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PropertyWrite {
    set: SerializedPropertyValues,
    unset: BTreeSet<PropertyName>,
}

pub(super) fn set_properties(
    command: &SetNodeProperties,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_not_root(&aggregate)?;
    let origin = &command.origin_dimension_space_point;
    require_allowed_point(model, origin.as_point())?;
    require_occupied(&aggregate, origin)?;
    let node_type = require_node_type(model, &aggregate.node_type_name)?;

    // The command origin always gets an event, even for an empty write.
    let mut writes: BTreeMap<OriginDimensionSpacePoint, PropertyWrite> =
        BTreeMap::from([(origin.clone(), PropertyWrite::default())]);
    for (name, value) in &command.property_values {
        let declaration = require_property_declared(node_type, name)?;
        if let Some(value) = value {
            check_value(name, declaration, value)?;
        }
        for target in scope_origins(model, &aggregate, origin, declaration.scope) {
            let write = writes.entry(target).or_default();
            match value {
                Some(value) => write.set.insert(name.clone(), value.clone()),
                None => {
                    write.unset.insert(name.clone());
                }
            }
        }
    }

    let events = writes
        .into_iter()
        .map(|(target, write)| {
            EventData::NodePropertiesWereSet(NodePropertiesWereSet {
                content_stream_id: command.content_stream_id.clone(),
                node_aggregate_id: aggregate.id.clone(),
                affected_dimension_space_points: aggregate.coverage_of(&target),
                origin_dimension_space_point: target,
                property_values: write.set,
                properties_to_unset: write.unset,
            })
        })
        .collect();
    Ok(EventsToPublish::for_content_stream(&record, events))
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

pub(super) fn set_references(
    command: &SetNodeReferences,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let source = require_aggregate(&graph, &command.source_node_aggregate_id)?;
    require_not_root(&source)?;
    let origin = &command.source_origin_dimension_space_point;
    require_allowed_point(model, origin.as_point())?;
    require_occupied(&source, origin)?;
    let node_type = require_node_type(model, &source.node_type_name)?;
    let declaration =
        node_type
            .reference(&command.reference_name)
            .ok_or_else(|| CommandError::ReferenceNotDeclared {
                node_type: node_type.name.clone(),
                reference: command.reference_name.clone(),
            })?;
    if let Some(max) = declaration
        .max_items
        .filter(|max| command.references.len() > *max)
    {
        return Err(CommandError::TooManyReferences {
            reference: command.reference_name.clone(),
            max,
            actual: command.references.len(),
        });
    }

    let mut references = Vec::with_capacity(command.references.len());
    for reference in &command.references {
        let target = require_aggregate(&graph, &reference.target_node_aggregate_id)?;
        require_covers(&target, origin.as_point())?;
        let target_type = require_node_type(model, &target.node_type_name)?;
        if !declaration.target_constraints.is_empty()
            && !declaration.target_constraints.allows(target_type)
        {
            return Err(CommandError::ReferenceTargetNotAllowed {
                reference: command.reference_name.clone(),
                target: target.id.clone(),
                target_type: target.node_type_name.clone(),
            });
        }
        for (name, value) in reference.properties.iter() {
            let property = declaration.properties.get(name).ok_or_else(|| {
                CommandError::PropertyNotDeclared {
                    node_type: node_type.name.clone(),
                    property: name.clone(),
                }
            })?;
            check_value(name, property, value)?;
        }
        references.push(SerializedNodeReference {
            target_node_aggregate_id: target.id,
            properties: reference.properties.clone(),
        });
    }

    let event = EventData::NodeReferencesWereSet(NodeReferencesWereSet {
        content_stream_id: command.content_stream_id.clone(),
        node_aggregate_id: source.id.clone(),
        affected_source_origin_dimension_space_points: scope_origins(
            model,
            &source,
            origin,
            declaration.scope,
        ),
        reference_name: command.reference_name.clone(),
        references,
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

pub(super) fn change_name(
    command: &ChangeNodeAggregateName,
    model: &ContentModel,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let (record, graph) = load_writable(lookup, &command.content_stream_id)?;
    let aggregate = require_aggregate(&graph, &command.node_aggregate_id)?;
    require_not_root(&aggregate)?;
    require_not_tethered(&aggregate)?;
    for parent_id in graph.parent_aggregate_ids(&aggregate.id) {
        let parent = require_aggregate(&graph, &parent_id)?;
        if let Some(parent_type) = model.node_types.get(&parent.node_type_name) {
            require_name_not_reserved(&parent, parent_type, &command.new_node_name)?;
        }
        require_name_not_covered(
            &graph,
            &parent_id,
            &command.new_node_name,
            &aggregate.covered,
            Some(&aggregate.id),
        )?;
    }

    let event = EventData::NodeAggregateNameWasChanged(NodeAggregateNameWasChanged {
        content_stream_id: command.content_stream_id.clone(),
        node_aggregate_id: aggregate.id.clone(),
        new_node_name: command.new_node_name.clone(),
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{FakeLookup, create_page, main_of, model, run, with_sites};
    use crate::command::{Command, CreateNodeVariant, NodeReferenceToWrite, decide};
    use crate::graph::test_support::{cs, id, origin};
    use crate::model::{NodeName, PropertyError, PropertyValue, ReferenceName};

    /// `home` at en with variants at de and fr, plus `about` at en.
    fn pages() -> FakeLookup {
        let mut lookup = with_sites();
        run(&mut lookup, create_page("home", "sites", "en", "home"));
        run(&mut lookup, create_page("about", "sites", "en", "about"));
        for target in ["de", "fr"] {
            run(
                &mut lookup,
                Command::CreateNodeVariant(CreateNodeVariant {
                    content_stream_id: cs(),
                    node_aggregate_id: id("home"),
                    source_origin: origin("en"),
                    target_origin: origin(target),
                }),
            );
        }
        lookup
    }

    fn set(property: &str, value: Option<PropertyValue>) -> Command {
        Command::SetNodeProperties(SetNodeProperties {
            content_stream_id: cs(),
            node_aggregate_id: id("home"),
            origin_dimension_space_point: origin("en"),
            property_values: BTreeMap::from([(PropertyName::new(property), value)]),
        })
    }

    fn text(value: &str) -> Option<PropertyValue> {
        Some(PropertyValue::String(value.into()))
    }

    fn origins_of(decided: &EventsToPublish) -> Vec<OriginDimensionSpacePoint> {
        decided
            .events
            .iter()
            .filter_map(|e| match e {
                EventData::NodePropertiesWereSet(e) => Some(e.origin_dimension_space_point.clone()),
                _ => None,
            })
            .collect()
    }

    fn title_at(lookup: &FakeLookup, at: &str) -> Option<String> {
        lookup
            .graph()
            .node(&id("home"), &origin(at))
            .and_then(|n| n.properties.get_str(&PropertyName::new("title")).ok())
            .map(str::to_string)
    }

    #[test]
    fn node_scope_writes_one_variant() {
        let mut lookup = pages();
        let decided = run(&mut lookup, set("title", text("Home")));
        assert_eq!(origins_of(&decided), vec![origin("en")]);
        assert_eq!(title_at(&lookup, "en").as_deref(), Some("Home"));
        assert_eq!(title_at(&lookup, "de").as_deref(), Some("Untitled"));
    }

    #[test]
    fn wider_scopes_reach_other_variants() {
        let mut lookup = pages();
        let decided = run(&mut lookup, set("teaser", text("Read me")));
        let mut reached = origins_of(&decided);
        reached.sort();
        let mut expected = vec![origin("de"), origin("en")];
        expected.sort();
        assert_eq!(reached, expected);

        let decided = run(&mut lookup, set("hidden", Some(PropertyValue::Bool(true))));
        assert_eq!(origins_of(&decided).len(), 3);
    }

    #[test]
    fn null_unsets_and_undeclared_or_mistyped_values_fail() {
        let mut lookup = pages();
        run(&mut lookup, set("title", None));
        assert_eq!(title_at(&lookup, "en"), None);

        let model = model();
        assert!(matches!(
            decide(&set("colour", text("red")), &model, &lookup),
            Err(CommandError::PropertyNotDeclared { .. })
        ));
        assert!(matches!(
            decide(&set("title", Some(PropertyValue::Int(3))), &model, &lookup),
            Err(CommandError::Property(PropertyError::TypeMismatch { .. }))
        ));
    }

    fn refer(name: &str, targets: &[&str]) -> Command {
        Command::SetNodeReferences(SetNodeReferences {
            content_stream_id: cs(),
            source_node_aggregate_id: id("home"),
            source_origin_dimension_space_point: origin("en"),
            reference_name: ReferenceName::new(name),
            references: targets
                .iter()
                .map(|t| NodeReferenceToWrite {
                    target_node_aggregate_id: id(t),
                    properties: SerializedPropertyValues::new(),
                })
                .collect(),
        })
    }

    #[test]
    fn references_are_written_by_scope() {
        let mut lookup = pages();
        let decided = run(&mut lookup, refer("related", &["about"]));
        let EventData::NodeReferencesWereSet(event) = &decided.events[0] else {
            panic!("expected references event");
        };
        assert_eq!(event.affected_source_origin_dimension_space_points.len(), 1);
        let node = lookup.graph().node(&id("home"), &origin("en")).expect("node");
        assert_eq!(node.references[&ReferenceName::new("related")].len(), 1);

        let decided = run(&mut lookup, refer("seeAlso", &["about"]));
        let EventData::NodeReferencesWereSet(event) = &decided.events[0] else {
            panic!("expected references event");
        };
        assert_eq!(event.affected_source_origin_dimension_space_points.len(), 3);
    }

    #[test]
    fn reference_preconditions() {
        let lookup = pages();
        let model = model();
        assert!(matches!(
            decide(&refer("parent", &["about"]), &model, &lookup),
            Err(CommandError::ReferenceNotDeclared { .. })
        ));
        assert!(matches!(
            decide(&refer("related", &["about", "about", "home"]), &model, &lookup),
            Err(CommandError::TooManyReferences { max: 2, actual: 3, .. })
        ));
        assert!(matches!(
            decide(&refer("related", &[main_of("about").as_str()]), &model, &lookup),
            Err(CommandError::ReferenceTargetNotAllowed { .. })
        ));
        assert!(matches!(
            decide(&refer("related", &["nowhere"]), &model, &lookup),
            Err(CommandError::NodeAggregateCurrentlyDoesNotExist(_))
        ));
    }

    fn rename(node: &str, name: &str) -> Command {
        Command::ChangeNodeAggregateName(ChangeNodeAggregateName {
            content_stream_id: cs(),
            node_aggregate_id: id(node),
            new_node_name: NodeName::new(name),
        })
    }

    #[test]
    fn renames_respect_siblings_and_tethering() {
        let mut lookup = pages();
        run(&mut lookup, rename("home", "start"));
        let home = lookup.graph().node_aggregate(&id("home")).expect("home");
        assert_eq!(home.node_name, Some(NodeName::new("start")));

        let model = model();
        assert!(matches!(
            decide(&rename("about", "start"), &model, &lookup),
            Err(CommandError::NodeNameIsAlreadyCovered { .. })
        ));
        assert!(matches!(
            decide(&rename(main_of("home").as_str(), "body"), &model, &lookup),
            Err(CommandError::NodeAggregateIsTethered(_))
        ));
        assert!(matches!(
            decide(&rename("sites", "top"), &model, &lookup),
            Err(CommandError::NodeAggregateIsRoot(_))
        ));
    }
}
