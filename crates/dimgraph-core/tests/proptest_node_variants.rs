//! Random variant sequences against a repository: however variants are
//! created, every covered point belongs to exactly one variant.

use std::collections::BTreeMap;

use dimgraph_core::command::{
    ContentStreamLookup, CreateContentStream, CreateNodeAggregateWithNode, CreateNodeVariant,
    CreateRootNodeAggregateWithNode,
};
use dimgraph_core::dimension::{DimensionSpacePointSet, OriginDimensionSpacePoint};
use dimgraph_core::model::{
    ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, SerializedPropertyValues,
};
use dimgraph_core::store::StreamName;
use dimgraph_core::{Command, CommandError, ContentRepository, RepositoryConfig};
use proptest::prelude::*;

const MODEL: &str = r#"
[[dimensions]]
id = "language"
values = [
    { value = "en" },
    { value = "de", generalization = "en" },
    { value = "ch", generalization = "de" },
    { value = "fr" },
]

[[dimensions]]
id = "market"
values = [
    { value = "world" },
    { value = "eu", generalization = "world" },
]

[node_types."acme:Sites"]
super_types = ["dimgraph:Root"]
constraints = { "*" = true }

[node_types."acme:Page"]
constraints = { "*" = true }
"#;

const LANGUAGES: [&str; 4] = ["en", "de", "ch", "fr"];
const MARKETS: [&str; 2] = ["world", "eu"];
const NODES: [&str; 2] = ["home", "about"];

fn cs() -> ContentStreamId {
    ContentStreamId::new_unchecked("cs-main")
}

fn id(raw: &str) -> NodeAggregateId {
    NodeAggregateId::new_unchecked(raw)
}

fn origin(language: &str, market: &str) -> OriginDimensionSpacePoint {
    OriginDimensionSpacePoint::from_pairs([("language", language), ("market", market)])
}

fn create_page(node: &str, parent: &str) -> Command {
    Command::CreateNodeAggregateWithNode(CreateNodeAggregateWithNode {
        content_stream_id: cs(),
        node_aggregate_id: id(node),
        node_type_name: NodeTypeName::new("acme:Page"),
        origin_dimension_space_point: origin("en", "world"),
        parent_node_aggregate_id: id(parent),
        succeeding_sibling_node_aggregate_id: None,
        node_name: Some(NodeName::new(node)),
        initial_property_values: SerializedPropertyValues::new(),
        tethered_descendant_node_aggregate_ids: BTreeMap::new(),
    })
}

/// `sites` covering everything, `home` below it and `about` below `home`,
/// both originating in en/world.
fn repository() -> ContentRepository {
    let config = RepositoryConfig::from_toml_str(MODEL).expect("config");
    let mut repo = ContentRepository::in_memory(config).expect("repository");
    for command in [
        Command::CreateContentStream(CreateContentStream { content_stream_id: cs() }),
        Command::CreateRootNodeAggregateWithNode(CreateRootNodeAggregateWithNode {
            content_stream_id: cs(),
            node_aggregate_id: id("sites"),
            node_type_name: NodeTypeName::new("acme:Sites"),
            tethered_descendant_node_aggregate_ids: BTreeMap::new(),
        }),
        create_page("home", "sites"),
        create_page("about", "home"),
    ] {
        repo.handle(&command).expect("setup");
    }
    repo
}

/// (node, source language, source market, target language, target market)
type VariantStep = (usize, usize, usize, usize, usize);

fn arb_step() -> impl Strategy<Value = VariantStep> {
    (
        0..NODES.len(),
        0..LANGUAGES.len(),
        0..MARKETS.len(),
        0..LANGUAGES.len(),
        0..MARKETS.len(),
    )
}

fn variant((node, source_lang, source_market, target_lang, target_market): VariantStep) -> Command {
    Command::CreateNodeVariant(CreateNodeVariant {
        content_stream_id: cs(),
        node_aggregate_id: id(NODES[node]),
        source_origin: origin(LANGUAGES[source_lang], MARKETS[source_market]),
        target_origin: origin(LANGUAGES[target_lang], MARKETS[target_market]),
    })
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(48))]

    #[test]
    fn coverage_is_partitioned_among_variants(steps in prop::collection::vec(arb_step(), 1..12)) {
        let mut repo = repository();
        let stream = StreamName::for_content_stream(&cs());

        for step in steps {
            let before = repo.stream_version(&stream).expect("version");
            match repo.handle(&variant(step)) {
                Ok(_) => {}
                Err(err) => {
                    // Rejections are precondition failures and leave the log alone.
                    prop_assert!(!err.is_retryable(), "{err}");
                    prop_assert!(
                        !matches!(err, CommandError::Store(_) | CommandError::Projection(_)),
                        "{err}"
                    );
                    prop_assert_eq!(repo.stream_version(&stream).expect("version"), before);
                }
            }

            let graph = repo.content_graph(&cs()).expect("graph");
            for node in NODES {
                let aggregate = graph.node_aggregate(&id(node)).expect("aggregate");
                let per_variant: usize =
                    aggregate.coverage_by_origin.values().map(DimensionSpacePointSet::len).sum();
                prop_assert_eq!(per_variant, aggregate.covered.len(), "{} overlaps", node);
                for covering in aggregate.coverage_by_origin.keys() {
                    prop_assert!(
                        aggregate.occupies(covering),
                        "{} covers from a free origin",
                        node
                    );
                }
                prop_assert!(aggregate.covers(&origin("en", "world").to_point()));
            }
        }
    }
}
