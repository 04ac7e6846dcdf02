//! The inter-dimensional variation graph.
//!
//! Derived once from a [`ContentDimensionSource`] and immutable afterwards.
//! Every query is answered from precomputed indexes:
//!
//! - the allowed subspace (cross product of all values pruned by constraints),
//! - normalized weights per point,
//! - direct and transitive generalizations / specializations,
//! - the primary generalization of each point.
//!
//! # Weights
//!
//! A point's weight is `Σ depth_i · base^(n-1-i)` over the dimensions in
//! priority order, where `base = max depth + 1`. A fallback step in a
//! low-priority dimension therefore costs less than one in a high-priority
//! dimension, and the weight difference between a point and one of its
//! generalizations is its fallback depth.
//!
//! # Edges
//!
//! Specialization edges link allowed points only. When the direct step in a
//! dimension leads to a disallowed point, the chain is not bridged.

use std::collections::HashMap;

use super::point::{DimensionSpacePoint, DimensionSpacePointSet};
use super::source::ContentDimensionSource;

/// How a subject point relates to an object point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Same,
    /// The subject falls back to the object.
    Specialization,
    /// The object falls back to the subject.
    Generalization,
    Peer,
}

impl VariantType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Specialization => "specialization",
            Self::Generalization => "generalization",
            Self::Peer => "peer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionSpaceError {
    #[error("dimension space point {point} is not part of the allowed dimension subspace")]
    DimensionSpacePointNotFound { point: DimensionSpacePoint },

    #[error("{from} does not fall back to {to}")]
    InvalidFallback {
        from: DimensionSpacePoint,
        to: DimensionSpacePoint,
    },
}

#[derive(Debug, Clone)]
pub struct InterDimensionalVariationGraph {
    source: ContentDimensionSource,
    allowed: DimensionSpacePointSet,
    weights: HashMap<DimensionSpacePoint, u64>,
    direct_generalizations: HashMap<DimensionSpacePoint, DimensionSpacePointSet>,
    generalizations: HashMap<DimensionSpacePoint, DimensionSpacePointSet>,
    specializations: HashMap<DimensionSpacePoint, DimensionSpacePointSet>,
    primary_generalizations: HashMap<DimensionSpacePoint, DimensionSpacePoint>,
}

impl InterDimensionalVariationGraph {
    #[must_use]
    pub fn new(source: ContentDimensionSource) -> Self {
        let allowed = allowed_subspace(&source);
        let weights = allowed
            .iter()
            .map(|p| (p.clone(), normalized_weight(&source, p)))
            .collect::<HashMap<_, _>>();

        let mut direct_generalizations: HashMap<DimensionSpacePoint, DimensionSpacePointSet> =
            HashMap::new();
        for general in &allowed {
            for dimension in source.dimensions() {
                let Some(value) = general
                    .coordinate(&dimension.id)
                    .and_then(|v| dimension.value(v))
                else {
                    continue;
                };
                for specialization in &value.specializations {
                    let special = general.vary(&dimension.id, specialization);
                    if allowed.contains(&special) {
                        direct_generalizations
                            .entry(special)
                            .or_default()
                            .insert(general.clone());
                    }
                }
            }
        }

        // Each direct generalization is exactly one step shallower, so walking
        // points by total depth sees every generalization before its
        // specializations.
        let mut by_depth: Vec<&DimensionSpacePoint> = allowed.iter().collect();
        by_depth.sort_by_key(|p| (total_depth(&source, p), (*p).clone()));

        let mut generalizations: HashMap<DimensionSpacePoint, DimensionSpacePointSet> =
            HashMap::new();
        for point in by_depth {
            let mut all = DimensionSpacePointSet::new();
            if let Some(direct) = direct_generalizations.get(point) {
                for general in direct {
                    all.insert(general.clone());
                    if let Some(transitive) = generalizations.get(general) {
                        all.extend(transitive.iter().cloned());
                    }
                }
            }
            generalizations.insert(point.clone(), all);
        }

        let mut specializations: HashMap<DimensionSpacePoint, DimensionSpacePointSet> = allowed
            .iter()
            .map(|p| (p.clone(), DimensionSpacePointSet::new()))
            .collect();
        for (special, generals) in &generalizations {
            for general in generals {
                specializations
                    .entry(general.clone())
                    .or_default()
                    .insert(special.clone());
            }
        }

        let primary_generalizations = direct_generalizations
            .iter()
            .filter_map(|(special, generals)| {
                generals
                    .iter()
                    .max_by(|a, b| {
                        // Highest weight = lowest weight difference; ties go to
                        // the smaller point so the choice is deterministic.
                        weights
                            .get(*a)
                            .cmp(&weights.get(*b))
                            .then_with(|| b.cmp(a))
                    })
                    .map(|g| (special.clone(), g.clone()))
            })
            .collect();

        tracing::debug!(
            points = allowed.len(),
            dimensions = source.dimensions().len(),
            "built variation graph"
        );

        Self {
            source,
            allowed,
            weights,
            direct_generalizations,
            generalizations,
            specializations,
            primary_generalizations,
        }
    }

    #[must_use]
    pub const fn source(&self) -> &ContentDimensionSource {
        &self.source
    }

    /// Cross product of all dimension values pruned by value constraints.
    #[must_use]
    pub const fn allowed_dimension_subspace(&self) -> &DimensionSpacePointSet {
        &self.allowed
    }

    #[must_use]
    pub fn is_allowed(&self, point: &DimensionSpacePoint) -> bool {
        self.allowed.contains(point)
    }

    /// Fail with `DimensionSpacePointNotFound` unless `point` is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionSpaceError::DimensionSpacePointNotFound`].
    pub fn require_allowed(&self, point: &DimensionSpacePoint) -> Result<(), DimensionSpaceError> {
        if self.is_allowed(point) {
            Ok(())
        } else {
            Err(DimensionSpaceError::DimensionSpacePointNotFound {
                point: point.clone(),
            })
        }
    }

    #[must_use]
    pub fn weight(&self, point: &DimensionSpacePoint) -> Option<u64> {
        self.weights.get(point).copied()
    }

    /// How `subject` relates to `object`.
    ///
    /// `variant_type(b, a) == Specialization` when `b` falls back to `a`.
    /// Points outside the allowed subspace relate to everything as peers.
    #[must_use]
    pub fn variant_type(
        &self,
        subject: &DimensionSpacePoint,
        object: &DimensionSpacePoint,
    ) -> VariantType {
        if subject == object {
            VariantType::Same
        } else if self
            .generalizations
            .get(object)
            .is_some_and(|g| g.contains(subject))
        {
            VariantType::Generalization
        } else if self
            .specializations
            .get(object)
            .is_some_and(|s| s.contains(subject))
        {
            VariantType::Specialization
        } else {
            VariantType::Peer
        }
    }

    /// Distance travelled when `from` falls back to `to`.
    ///
    /// # Errors
    ///
    /// `DimensionSpacePointNotFound` if either point is outside the allowed
    /// subspace, `InvalidFallback` if `to` is neither `from` nor one of its
    /// generalizations.
    pub fn fallback_depth(
        &self,
        from: &DimensionSpacePoint,
        to: &DimensionSpacePoint,
    ) -> Result<u64, DimensionSpaceError> {
        self.require_allowed(from)?;
        self.require_allowed(to)?;
        if from == to {
            return Ok(0);
        }
        let is_fallback = self
            .generalizations
            .get(from)
            .is_some_and(|g| g.contains(to));
        match (is_fallback, self.weight(from), self.weight(to)) {
            (true, Some(special), Some(general)) => Ok(special.saturating_sub(general)),
            _ => Err(DimensionSpaceError::InvalidFallback {
                from: from.clone(),
                to: to.clone(),
            }),
        }
    }

    /// All points that fall back to `point`, transitively.
    #[must_use]
    pub fn specializations(&self, point: &DimensionSpacePoint) -> DimensionSpacePointSet {
        self.specializations.get(point).cloned().unwrap_or_default()
    }

    /// All points `point` falls back to, transitively.
    #[must_use]
    pub fn generalizations(&self, point: &DimensionSpacePoint) -> DimensionSpacePointSet {
        self.generalizations.get(point).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn direct_generalizations(&self, point: &DimensionSpacePoint) -> DimensionSpacePointSet {
        self.direct_generalizations
            .get(point)
            .cloned()
            .unwrap_or_default()
    }

    /// The direct generalization with the lowest fallback depth.
    #[must_use]
    pub fn primary_generalization(
        &self,
        point: &DimensionSpacePoint,
    ) -> Option<&DimensionSpacePoint> {
        self.primary_generalizations.get(point)
    }

    /// Generalizations of `point` ordered by fallback depth, nearest first.
    #[must_use]
    pub fn weighted_generalizations(
        &self,
        point: &DimensionSpacePoint,
    ) -> Vec<(u64, DimensionSpacePoint)> {
        let own = self.weight(point).unwrap_or(0);
        let mut weighted: Vec<_> = self
            .generalizations(point)
            .into_iter()
            .map(|g| (own.saturating_sub(self.weight(&g).unwrap_or(0)), g))
            .collect();
        weighted.sort();
        weighted
    }

    /// Allowed points that do not fall back to anything.
    #[must_use]
    pub fn root_generalizations(&self) -> DimensionSpacePointSet {
        self.allowed
            .iter()
            .filter(|p| {
                self.direct_generalizations
                    .get(*p)
                    .is_none_or(DimensionSpacePointSet::is_empty)
            })
            .cloned()
            .collect()
    }

    /// Specializations of `origin` (optionally including it), minus the
    /// points in `excluded`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionSpacePointNotFound` if `origin` is not allowed.
    pub fn specialization_set(
        &self,
        origin: &DimensionSpacePoint,
        include_origin: bool,
        excluded: &DimensionSpacePointSet,
    ) -> Result<DimensionSpacePointSet, DimensionSpaceError> {
        self.require_allowed(origin)?;
        let mut set = DimensionSpacePointSet::new();
        if include_origin {
            set.insert(origin.clone());
        }
        for special in self.specializations.get(origin).into_iter().flatten() {
            if !excluded.contains(special) {
                set.insert(special.clone());
            }
        }
        Ok(set)
    }

    /// Among `candidates`, the one `point` resolves to: `point` itself or the
    /// generalization with the lowest fallback depth.
    ///
    /// Candidates that `point` does not fall back to are ignored. Equal depths
    /// are broken by the smaller content hash.
    pub fn nearest_origin<'a, I>(
        &self,
        point: &DimensionSpacePoint,
        candidates: I,
    ) -> Option<&'a DimensionSpacePoint>
    where
        I: IntoIterator<Item = &'a DimensionSpacePoint>,
    {
        candidates
            .into_iter()
            .filter_map(|c| {
                self.fallback_depth(point, c)
                    .ok()
                    .map(|depth| (depth, c.content_hash(), c))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, _, c)| c)
    }

    /// Points a variant at `target` covers, given the origins the aggregate
    /// already occupies.
    ///
    /// Starts from the specialization set of `target` and keeps each point
    /// whose nearest occupied origin would be `target`. A more specific
    /// occupied origin keeps its points; a peer keeps its points when it is
    /// nearer by fallback depth.
    ///
    /// # Errors
    ///
    /// Returns `DimensionSpacePointNotFound` if `target` is not allowed.
    pub fn fan_out<'a, I>(
        &self,
        target: &'a DimensionSpacePoint,
        occupied: I,
    ) -> Result<DimensionSpacePointSet, DimensionSpaceError>
    where
        I: IntoIterator<Item = &'a DimensionSpacePoint>,
    {
        let candidates: Vec<&DimensionSpacePoint> = occupied
            .into_iter()
            .filter(|o| *o != target)
            .chain(std::iter::once(target))
            .collect();
        let all = self.specialization_set(target, true, &DimensionSpacePointSet::new())?;
        Ok(all
            .into_iter()
            .filter(|p| self.nearest_origin(p, candidates.iter().copied()) == Some(target))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn allowed_subspace(source: &ContentDimensionSource) -> DimensionSpacePointSet {
    let mut points = vec![DimensionSpacePoint::empty()];
    for dimension in source.dimensions() {
        let mut next = Vec::with_capacity(points.len() * 2);
        for point in &points {
            for value in dimension.values() {
                next.push(point.vary(&dimension.id, &value.value));
            }
        }
        points = next;
    }
    points
        .into_iter()
        .filter(|p| satisfies_constraints(source, p))
        .collect()
}

fn satisfies_constraints(source: &ContentDimensionSource, point: &DimensionSpacePoint) -> bool {
    source.dimensions().iter().all(|dimension| {
        let Some(value) = point
            .coordinate(&dimension.id)
            .and_then(|v| dimension.value(v))
        else {
            return false;
        };
        value.constraints.iter().all(|(target, constraints)| {
            point
                .coordinate(target)
                .is_none_or(|other| constraints.allows(other))
        })
    })
}

fn depth_of(
    source: &ContentDimensionSource,
    point: &DimensionSpacePoint,
    dimension: usize,
) -> usize {
    source
        .dimensions()
        .get(dimension)
        .and_then(|d| point.coordinate(&d.id).and_then(|v| d.value(v)))
        .map_or(0, |v| v.specialization_depth)
}

fn total_depth(source: &ContentDimensionSource, point: &DimensionSpacePoint) -> usize {
    (0..source.dimensions().len())
        .map(|i| depth_of(source, point, i))
        .sum()
}

fn normalized_weight(source: &ContentDimensionSource, point: &DimensionSpacePoint) -> u64 {
    let base = u64::try_from(source.max_depth()).unwrap_or(u64::MAX).saturating_add(1);
    let count = source.dimensions().len();
    (0..count).fold(0_u64, |weight, i| {
        let exponent = u32::try_from(count - 1 - i).unwrap_or(u32::MAX);
        let depth = u64::try_from(depth_of(source, point, i)).unwrap_or(u64::MAX);
        weight.saturating_add(depth.saturating_mul(base.saturating_pow(exponent)))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::dimension::source::{DimensionConfig, DimensionValueConfig};

    fn value(value: &str, generalization: Option<&str>) -> DimensionValueConfig {
        DimensionValueConfig {
            value: value.into(),
            generalization: generalization.map(Into::into),
            constraints: BTreeMap::new(),
        }
    }

    fn graph(configs: Vec<DimensionConfig>) -> InterDimensionalVariationGraph {
        InterDimensionalVariationGraph::new(
            ContentDimensionSource::from_config(&configs).expect("valid dimensions"),
        )
    }

    fn language_market() -> InterDimensionalVariationGraph {
        graph(vec![
            DimensionConfig {
                id: "language".into(),
                values: vec![value("en", None), value("de", Some("en")), value("gsw", Some("de"))],
            },
            DimensionConfig {
                id: "market".into(),
                values: vec![value("world", None), value("CH", Some("world"))],
            },
        ])
    }

    fn p(language: &str, market: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::from_pairs([("language", language), ("market", market)])
    }

    #[test]
    fn dimensionless_space_has_one_empty_point() {
        let g = graph(vec![]);
        assert_eq!(g.allowed_dimension_subspace().len(), 1);
        assert!(g.is_allowed(&DimensionSpacePoint::empty()));
        assert_eq!(g.root_generalizations().len(), 1);
    }

    #[test]
    fn cross_product_is_allowed_without_constraints() {
        assert_eq!(language_market().allowed_dimension_subspace().len(), 6);
    }

    #[test]
    fn constraints_prune_the_subspace() {
        let mut gsw = value("gsw", Some("de"));
        gsw.constraints.insert(
            "market".into(),
            BTreeMap::from([("*".to_string(), false), ("CH".to_string(), true)]),
        );
        let g = graph(vec![
            DimensionConfig {
                id: "language".into(),
                values: vec![value("en", None), value("de", Some("en")), gsw],
            },
            DimensionConfig {
                id: "market".into(),
                values: vec![value("world", None), value("CH", Some("world"))],
            },
        ]);
        assert!(g.is_allowed(&p("gsw", "CH")));
        assert!(!g.is_allowed(&p("gsw", "world")));
        assert_eq!(g.allowed_dimension_subspace().len(), 5);
    }

    #[test]
    fn variant_types() {
        let g = language_market();
        assert_eq!(g.variant_type(&p("de", "CH"), &p("en", "world")), VariantType::Specialization);
        assert_eq!(g.variant_type(&p("en", "world"), &p("de", "CH")), VariantType::Generalization);
        assert_eq!(g.variant_type(&p("de", "world"), &p("en", "CH")), VariantType::Peer);
        assert_eq!(g.variant_type(&p("de", "CH"), &p("de", "CH")), VariantType::Same);
    }

    #[test]
    fn fallback_depth_weighs_dimension_priority() {
        let g = language_market();
        // base = 3; language is the high-priority dimension.
        assert_eq!(g.fallback_depth(&p("de", "CH"), &p("de", "world")), Ok(1));
        assert_eq!(g.fallback_depth(&p("de", "CH"), &p("en", "CH")), Ok(3));
        assert_eq!(g.fallback_depth(&p("gsw", "CH"), &p("en", "world")), Ok(7));
        assert!(matches!(
            g.fallback_depth(&p("de", "world"), &p("en", "CH")),
            Err(DimensionSpaceError::InvalidFallback { .. })
        ));
        assert!(matches!(
            g.fallback_depth(&p("fr", "world"), &p("en", "world")),
            Err(DimensionSpaceError::DimensionSpacePointNotFound { .. })
        ));
    }

    #[test]
    fn primary_generalization_is_the_nearest_direct_one() {
        let g = language_market();
        assert_eq!(g.primary_generalization(&p("de", "CH")), Some(&p("de", "world")));
        assert_eq!(g.primary_generalization(&p("en", "world")), None);
        let weighted = g.weighted_generalizations(&p("de", "CH"));
        assert_eq!(weighted.first(), Some(&(1, p("de", "world"))));
        assert_eq!(weighted.last(), Some(&(4, p("en", "world"))));
    }

    #[test]
    fn root_generalizations_have_no_fallback() {
        let g = language_market();
        let roots = g.root_generalizations();
        assert_eq!(roots.len(), 1);
        assert!(roots.contains(&p("en", "world")));
    }

    #[test]
    fn specialization_set_respects_exclusions() {
        let g = language_market();
        let excluded = g
            .specialization_set(&p("de", "world"), true, &DimensionSpacePointSet::new())
            .expect("allowed");
        let set = g
            .specialization_set(&p("en", "world"), true, &excluded)
            .expect("allowed");
        assert!(set.contains(&p("en", "world")));
        assert!(set.contains(&p("en", "CH")));
        assert!(!set.contains(&p("de", "CH")));
        assert!(!set.contains(&p("gsw", "CH")));
    }

    #[test]
    fn fan_out_stops_at_occupied_specializations() {
        let g = language_market();
        let occupied = [p("en", "world"), p("gsw", "world")];
        let covered = g.fan_out(&p("de", "world"), &occupied).expect("allowed");
        let expected: DimensionSpacePointSet = [p("de", "world"), p("de", "CH")].into();
        assert_eq!(covered, expected);
    }

    #[test]
    fn fan_out_resolves_peers_by_fallback_depth() {
        let g = language_market();
        // (de, CH) falls back to (de, world) at depth 1 and to (en, CH) at
        // depth 3; the nearer peer keeps it.
        let occupied = [p("de", "world")];
        let covered = g.fan_out(&p("en", "CH"), &occupied).expect("allowed");
        let expected: DimensionSpacePointSet = [p("en", "CH")].into();
        assert_eq!(covered, expected);

        let occupied = [p("en", "CH")];
        let covered = g.fan_out(&p("de", "world"), &occupied).expect("allowed");
        assert!(covered.contains(&p("de", "CH")));
        assert!(covered.contains(&p("gsw", "CH")));
    }

    #[test]
    fn disallowed_intermediate_points_break_the_chain() {
        let mut de = value("de", Some("en"));
        de.constraints.insert(
            "market".into(),
            BTreeMap::from([("world".to_string(), false)]),
        );
        let g = graph(vec![
            DimensionConfig {
                id: "language".into(),
                values: vec![value("en", None), de],
            },
            DimensionConfig {
                id: "market".into(),
                values: vec![value("world", None), value("CH", Some("world"))],
            },
        ]);
        assert!(!g.is_allowed(&p("de", "world")));
        // (de, CH) still reaches (en, world) through (en, CH).
        assert_eq!(
            g.variant_type(&p("de", "CH"), &p("en", "world")),
            VariantType::Specialization
        );
        assert_eq!(g.primary_generalization(&p("de", "CH")), Some(&p("en", "CH")));
    }
}
