//! End-to-end command scenarios against an in-memory repository: variant
//! resolution across dimensions, optimistic concurrency and stream closing.

use std::collections::BTreeMap;

use dimgraph_core::command::{
    CloseContentStream, ContentStreamLookup, CreateContentStream, CreateNodeAggregateWithNode,
    CreateNodeVariant, CreateRootNodeAggregateWithNode, ReopenContentStream, SetNodeProperties,
    decide,
};
use dimgraph_core::dimension::{DimensionSpacePoint, OriginDimensionSpacePoint};
use dimgraph_core::model::{
    ContentStreamId, ContentStreamState, NodeAggregateId, NodeName, NodeTypeName, PropertyName,
    PropertyValue, SerializedPropertyValues,
};
use dimgraph_core::store::{StreamName, Version};
use dimgraph_core::{Command, CommandError, ContentRepository, RepositoryConfig};

const MODEL: &str = r#"
[[dimensions]]
id = "language"
values = [
    { value = "en" },
    { value = "de", generalization = "en" },
    { value = "ch", generalization = "de" },
    { value = "fr" },
]

[node_types."acme:Sites"]
super_types = ["dimgraph:Root"]
constraints = { "*" = true }

[node_types."acme:Page"]
constraints = { "*" = true }
properties.title = { type = "string", default = "Untitled" }
"#;

fn cs() -> ContentStreamId {
    ContentStreamId::new_unchecked("cs-main")
}

fn id(raw: &str) -> NodeAggregateId {
    NodeAggregateId::new_unchecked(raw)
}

fn lang(value: &str) -> DimensionSpacePoint {
    DimensionSpacePoint::from_pairs([("language", value)])
}

fn origin(value: &str) -> OriginDimensionSpacePoint {
    OriginDimensionSpacePoint::from_pairs([("language", value)])
}

fn title(repo: &ContentRepository, node: &str, point: &str) -> Option<String> {
    let graph = repo.content_graph(&cs()).expect("graph");
    let record = graph.covering_node(&id(node), &lang(point))?;
    record
        .properties
        .get_str(&PropertyName::new("title"))
        .ok()
        .map(str::to_string)
}

fn set_title(node: &str, at: &str, value: &str) -> Command {
    Command::SetNodeProperties(SetNodeProperties {
        content_stream_id: cs(),
        node_aggregate_id: id(node),
        origin_dimension_space_point: origin(at),
        property_values: BTreeMap::from([(
            PropertyName::new("title"),
            Some(PropertyValue::String(value.to_string())),
        )]),
    })
}

fn create_page(node: &str) -> Command {
    Command::CreateNodeAggregateWithNode(CreateNodeAggregateWithNode {
        content_stream_id: cs(),
        node_aggregate_id: id(node),
        node_type_name: NodeTypeName::new("acme:Page"),
        origin_dimension_space_point: origin("en"),
        parent_node_aggregate_id: id("sites"),
        succeeding_sibling_node_aggregate_id: None,
        node_name: Some(NodeName::new(node)),
        initial_property_values: SerializedPropertyValues::new(),
        tethered_descendant_node_aggregate_ids: BTreeMap::new(),
    })
}

/// A repository with `cs-main` holding the `sites` root.
fn repository() -> ContentRepository {
    let config = RepositoryConfig::from_toml_str(MODEL).expect("config");
    let mut repo = ContentRepository::in_memory(config).expect("repository");
    repo.handle(&Command::CreateContentStream(CreateContentStream {
        content_stream_id: cs(),
    }))
    .expect("stream");
    repo.handle(&Command::CreateRootNodeAggregateWithNode(CreateRootNodeAggregateWithNode {
        content_stream_id: cs(),
        node_aggregate_id: id("sites"),
        node_type_name: NodeTypeName::new("acme:Sites"),
        tethered_descendant_node_aggregate_ids: BTreeMap::new(),
    }))
    .expect("root");
    repo
}

#[test]
fn specialized_variant_wins_in_its_coverage() {
    let mut repo = repository();
    repo.handle(&create_page("home")).expect("page");
    repo.handle(&set_title("home", "en", "Home")).expect("en title");

    // The en variant falls through to every specialization.
    assert_eq!(title(&repo, "home", "de").as_deref(), Some("Home"));
    assert_eq!(title(&repo, "home", "ch").as_deref(), Some("Home"));
    assert_eq!(title(&repo, "home", "fr"), None);

    repo.handle(&Command::CreateNodeVariant(CreateNodeVariant {
        content_stream_id: cs(),
        node_aggregate_id: id("home"),
        source_origin: origin("en"),
        target_origin: origin("de"),
    }))
    .expect("de variant");
    repo.handle(&set_title("home", "de", "Startseite")).expect("de title");

    assert_eq!(title(&repo, "home", "en").as_deref(), Some("Home"));
    assert_eq!(title(&repo, "home", "de").as_deref(), Some("Startseite"));
    // ch has no variant of its own and resolves to the nearest occupied origin.
    assert_eq!(title(&repo, "home", "ch").as_deref(), Some("Startseite"));

    let graph = repo.content_graph(&cs()).expect("graph");
    let ch = graph.covering_node(&id("home"), &lang("ch")).expect("covered");
    assert_eq!(ch.origin_dimension_space_point, origin("de"));

    // Later writes to the generalization stop at the diverged variant.
    repo.handle(&set_title("home", "en", "Welcome")).expect("en again");
    assert_eq!(title(&repo, "home", "en").as_deref(), Some("Welcome"));
    assert_eq!(title(&repo, "home", "de").as_deref(), Some("Startseite"));
    assert_eq!(title(&repo, "home", "ch").as_deref(), Some("Startseite"));
}

#[test]
fn occupying_an_origin_twice_is_rejected() {
    let mut repo = repository();
    repo.handle(&create_page("home")).expect("page");
    let variant = Command::CreateNodeVariant(CreateNodeVariant {
        content_stream_id: cs(),
        node_aggregate_id: id("home"),
        source_origin: origin("en"),
        target_origin: origin("de"),
    });
    repo.handle(&variant).expect("first variant");
    let err = repo.handle(&variant).expect_err("already occupied");
    assert!(matches!(err, CommandError::DimensionSpacePointIsAlreadyOccupied { .. }));
}

#[test]
fn concurrent_decisions_on_one_version_commit_exactly_once() {
    let mut repo = repository();
    for page in ["a", "b", "c", "d"] {
        repo.handle(&create_page(page)).expect("page");
    }
    let stream = StreamName::for_content_stream(&cs());
    assert_eq!(repo.stream_version(&stream).expect("version"), Some(Version::new(5)));

    let first = set_title("a", "en", "First");
    let second = set_title("a", "en", "Second");
    let decided_first = decide(&first, repo.model(), &repo).expect("decide first");
    let decided_second = decide(&second, repo.model(), &repo).expect("decide second");

    let committed = repo.publish(&decided_first).expect("first wins");
    assert_eq!(committed.version, Version::new(6));

    let err = repo.publish(&decided_second).expect_err("second loses");
    assert!(matches!(err, CommandError::ConcurrencyConflict { .. }));
    assert!(err.is_retryable());
    assert_eq!(title(&repo, "a", "en").as_deref(), Some("First"));

    // Deciding again against the fresh state succeeds.
    let committed = repo.handle(&second).expect("retry");
    assert_eq!(committed.version, Version::new(7));
    assert_eq!(title(&repo, "a", "en").as_deref(), Some("Second"));
}

#[test]
fn reopen_restores_the_state_recorded_at_close() {
    let mut repo = repository();
    let state = |repo: &ContentRepository| {
        repo.content_stream(&cs())
            .expect("read")
            .expect("stream")
            .state
    };
    let before = state(&repo);
    assert_ne!(before, ContentStreamState::Closed);

    repo.handle(&Command::CloseContentStream(CloseContentStream {
        content_stream_id: cs(),
    }))
    .expect("close");
    assert_eq!(state(&repo), ContentStreamState::Closed);

    let err = repo.handle(&create_page("late")).expect_err("closed");
    assert!(matches!(err, CommandError::ContentStreamIsClosed(_)));

    let other = if before == ContentStreamState::New {
        ContentStreamState::Open
    } else {
        ContentStreamState::New
    };
    let err = repo
        .handle(&Command::ReopenContentStream(ReopenContentStream {
            content_stream_id: cs(),
            previous_state: other,
        }))
        .expect_err("state differs from the one at close");
    assert!(matches!(err, CommandError::InvalidCommandPayload { .. }));
    assert_eq!(state(&repo), ContentStreamState::Closed);

    repo.handle(&Command::ReopenContentStream(ReopenContentStream {
        content_stream_id: cs(),
        previous_state: before,
    }))
    .expect("reopen");
    assert_eq!(state(&repo), before);

    let err = repo
        .handle(&Command::ReopenContentStream(ReopenContentStream {
            content_stream_id: cs(),
            previous_state: before,
        }))
        .expect_err("never closed");
    assert!(matches!(err, CommandError::ContentStreamIsNotClosed(_)));
}

#[test]
fn unknown_dimension_values_are_rejected() {
    let mut repo = repository();
    let mut command = create_page("home");
    if let Command::CreateNodeAggregateWithNode(payload) = &mut command {
        payload.origin_dimension_space_point = origin("xx");
    }
    let err = repo.handle(&command).expect_err("not allowed");
    assert!(matches!(err, CommandError::DimensionSpace(_)));
    assert!(!repo.content_graph(&cs()).expect("graph").contains_aggregate(&id("home")));
}
