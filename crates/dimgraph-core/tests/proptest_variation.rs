use std::collections::BTreeMap;

use dimgraph_core::dimension::{
    ContentDimensionSource, DimensionConfig, DimensionSpacePoint, DimensionSpacePointSet,
    DimensionValueConfig, InterDimensionalVariationGraph, VariantType,
};
use proptest::prelude::*;
use proptest::sample::Index;

/// A dimension whose values form a random forest: value `i` either is a root
/// or generalizes to one of the values declared before it.
fn arb_dimension(id: &'static str) -> impl Strategy<Value = DimensionConfig> {
    prop::collection::vec(proptest::option::of(any::<Index>()), 0..5).prop_map(move |parents| {
        let mut values = vec![DimensionValueConfig {
            value: "v0".to_string(),
            generalization: None,
            constraints: BTreeMap::new(),
        }];
        for (offset, parent) in parents.into_iter().enumerate() {
            let position = offset + 1;
            values.push(DimensionValueConfig {
                value: format!("v{position}"),
                generalization: parent.map(|p| format!("v{}", p.index(position))),
                constraints: BTreeMap::new(),
            });
        }
        DimensionConfig {
            id: id.to_string(),
            values,
        }
    })
}

fn arb_graph() -> impl Strategy<Value = InterDimensionalVariationGraph> {
    (arb_dimension("language"), proptest::option::of(arb_dimension("market"))).prop_map(
        |(first, second)| {
            let configs: Vec<DimensionConfig> = std::iter::once(first).chain(second).collect();
            let source = ContentDimensionSource::from_config(&configs).expect("valid forest");
            InterDimensionalVariationGraph::new(source)
        },
    )
}

/// A graph plus a non-empty selection of its allowed points.
fn arb_graph_with_origins()
-> impl Strategy<Value = (InterDimensionalVariationGraph, DimensionSpacePointSet)> {
    arb_graph().prop_flat_map(|graph| {
        let points: Vec<DimensionSpacePoint> =
            graph.allowed_dimension_subspace().iter().cloned().collect();
        let len = points.len();
        (
            Just(graph),
            prop::sample::subsequence(points, 1..=len).prop_map(|p| p.into_iter().collect()),
        )
    })
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn allowed_subspace_is_the_cross_product(graph in arb_graph()) {
        let expected: usize = graph
            .source()
            .dimensions()
            .iter()
            .map(|d| d.values().count())
            .product();
        prop_assert_eq!(graph.allowed_dimension_subspace().len(), expected);
    }

    #[test]
    fn generalization_and_specialization_mirror_each_other(graph in arb_graph()) {
        for point in graph.allowed_dimension_subspace() {
            for general in graph.generalizations(point) {
                prop_assert!(graph.specializations(&general).contains(point));
                prop_assert_eq!(graph.variant_type(point, &general), VariantType::Specialization);
                prop_assert_eq!(graph.variant_type(&general, point), VariantType::Generalization);

                let depth = graph.fallback_depth(point, &general).expect("falls back");
                prop_assert!(depth > 0);
                let special_weight = graph.weight(point).expect("weighted");
                let general_weight = graph.weight(&general).expect("weighted");
                prop_assert_eq!(depth, special_weight - general_weight);
            }
        }
    }

    #[test]
    fn primary_generalization_is_the_nearest_direct_one(graph in arb_graph()) {
        for point in graph.allowed_dimension_subspace() {
            let direct = graph.direct_generalizations(point);
            match graph.primary_generalization(point) {
                None => prop_assert!(direct.is_empty()),
                Some(primary) => {
                    prop_assert!(direct.contains(primary));
                    let nearest = graph.weighted_generalizations(point)[0].0;
                    prop_assert_eq!(graph.fallback_depth(point, primary).expect("depth"), nearest);
                }
            }
        }
    }

    #[test]
    fn every_point_reaches_a_root_generalization(graph in arb_graph()) {
        let roots = graph.root_generalizations();
        prop_assert!(!roots.is_empty());
        for point in graph.allowed_dimension_subspace() {
            let reaches_root = roots.contains(point)
                || graph.generalizations(point).iter().any(|g| roots.contains(g));
            prop_assert!(reaches_root, "{} has no root", point);
        }
    }

    #[test]
    fn fan_out_partitions_the_covered_points((graph, origins) in arb_graph_with_origins()) {
        let mut seen = DimensionSpacePointSet::new();
        for origin in &origins {
            let covered = graph.fan_out(origin, origins.iter()).expect("allowed");
            prop_assert!(covered.contains(origin), "{} must cover itself", origin);
            for point in covered {
                prop_assert!(seen.insert(point.clone()), "{} covered twice", point);
            }
        }

        // Every point that falls back to some occupied origin is covered once.
        let reachable: DimensionSpacePointSet = graph
            .allowed_dimension_subspace()
            .iter()
            .filter(|p| {
                origins.contains(*p)
                    || graph.generalizations(p).iter().any(|g| origins.contains(g))
            })
            .cloned()
            .collect();
        prop_assert_eq!(seen, reachable);
    }
}
