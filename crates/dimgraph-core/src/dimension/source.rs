//! Content dimensions and their value hierarchies.
//!
//! Dimensions are declared in priority order: the first dimension is the most
//! significant one when fallback distances are weighed. Within a dimension each
//! value names at most one generalization; the resulting hierarchy is validated
//! to be acyclic before anything else is derived from it.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use super::point::DimensionSpacePoint;

/// Wildcard key in a constraint map.
pub const CONSTRAINT_WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// Configuration shape
// ---------------------------------------------------------------------------

/// One `[[dimensions]]` entry of the repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub id: String,
    #[serde(default)]
    pub values: Vec<DimensionValueConfig>,
}

/// A value inside a dimension declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValueConfig {
    pub value: String,
    /// The value this one falls back to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generalization: Option<String>,
    /// `other dimension -> (value | "*") -> allowed`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, BTreeMap<String, bool>>,
}

/// Errors raised while validating dimension configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionConfigError {
    #[error("dimension id must not be empty")]
    EmptyDimensionId,

    #[error("dimension '{0}' is declared twice")]
    DuplicateDimension(String),

    #[error("dimension '{0}' declares no values")]
    NoValues(String),

    #[error("dimension '{dimension}' declares value '{value}' twice")]
    DuplicateValue { dimension: String, value: String },

    #[error(
        "value '{value}' of dimension '{dimension}' falls back to \
         undeclared value '{generalization}'"
    )]
    UnknownGeneralization {
        dimension: String,
        value: String,
        generalization: String,
    },

    #[error("generalizations of dimension '{dimension}' form a cycle through '{value}'")]
    GeneralizationCycle { dimension: String, value: String },

    #[error("value '{value}' of dimension '{dimension}' constrains unknown dimension '{target}'")]
    UnknownConstraintDimension {
        dimension: String,
        value: String,
        target: String,
    },
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// Allowed/denied values of another dimension, as seen from one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueConstraints {
    wildcard: Option<bool>,
    explicit: BTreeMap<String, bool>,
}

impl ValueConstraints {
    fn from_map(map: &BTreeMap<String, bool>) -> Self {
        let mut constraints = Self::default();
        for (key, allowed) in map {
            if key == CONSTRAINT_WILDCARD {
                constraints.wildcard = Some(*allowed);
            } else {
                constraints.explicit.insert(key.clone(), *allowed);
            }
        }
        constraints
    }

    /// An explicit entry wins over the wildcard; no entry at all allows.
    #[must_use]
    pub fn allows(&self, value: &str) -> bool {
        self.explicit
            .get(value)
            .copied()
            .or(self.wildcard)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDimensionValue {
    pub value: String,
    /// Distance from the root of the value hierarchy; roots have depth 0.
    pub specialization_depth: usize,
    pub generalization: Option<String>,
    /// Direct specializations, in declaration order.
    pub specializations: Vec<String>,
    pub constraints: BTreeMap<String, ValueConstraints>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDimension {
    pub id: String,
    values: BTreeMap<String, ContentDimensionValue>,
    /// Declaration order, used wherever iteration order is observable.
    order: Vec<String>,
}

impl ContentDimension {
    #[must_use]
    pub fn value(&self, value: &str) -> Option<&ContentDimensionValue> {
        self.values.get(value)
    }

    /// Values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &ContentDimensionValue> {
        self.order.iter().filter_map(|v| self.values.get(v))
    }

    #[must_use]
    pub fn root_values(&self) -> Vec<&ContentDimensionValue> {
        self.values()
            .filter(|v| v.generalization.is_none())
            .collect()
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.values
            .values()
            .map(|v| v.specialization_depth)
            .max()
            .unwrap_or(0)
    }

    /// Whether `general` is `special` or one of its ancestors.
    #[must_use]
    pub fn generalizes_or_equals(&self, general: &str, special: &str) -> bool {
        let mut current = Some(special);
        while let Some(value) = current {
            if value == general {
                return true;
            }
            current = self
                .values
                .get(value)
                .and_then(|v| v.generalization.as_deref());
        }
        false
    }

    fn from_config(
        config: &DimensionConfig,
        known_dimensions: &BTreeSet<&str>,
    ) -> Result<Self, DimensionConfigError> {
        if config.values.is_empty() {
            return Err(DimensionConfigError::NoValues(config.id.clone()));
        }

        let mut declared: BTreeMap<&str, &DimensionValueConfig> = BTreeMap::new();
        for value in &config.values {
            if declared.insert(value.value.as_str(), value).is_some() {
                return Err(DimensionConfigError::DuplicateValue {
                    dimension: config.id.clone(),
                    value: value.value.clone(),
                });
            }
        }

        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for value in &config.values {
            graph.add_node(value.value.as_str());
            if let Some(generalization) = &value.generalization {
                if !declared.contains_key(generalization.as_str()) {
                    return Err(DimensionConfigError::UnknownGeneralization {
                        dimension: config.id.clone(),
                        value: value.value.clone(),
                        generalization: generalization.clone(),
                    });
                }
                graph.add_edge(generalization.as_str(), value.value.as_str(), ());
            }
            for target in value.constraints.keys() {
                if !known_dimensions.contains(target.as_str()) || *target == config.id {
                    return Err(DimensionConfigError::UnknownConstraintDimension {
                        dimension: config.id.clone(),
                        value: value.value.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Generalizations precede their specializations in topological order,
        // so depths can be assigned in a single pass.
        let sorted = toposort(&graph, None).map_err(|cycle| {
            DimensionConfigError::GeneralizationCycle {
                dimension: config.id.clone(),
                value: cycle.node_id().to_string(),
            }
        })?;
        let mut depths: BTreeMap<&str, usize> = BTreeMap::new();
        for value in sorted {
            let depth = declared
                .get(value)
                .and_then(|v| v.generalization.as_deref())
                .and_then(|g| depths.get(g))
                .map_or(0, |d| d + 1);
            depths.insert(value, depth);
        }

        let mut values = BTreeMap::new();
        for value in &config.values {
            let specializations = config
                .values
                .iter()
                .filter(|v| v.generalization.as_deref() == Some(value.value.as_str()))
                .map(|v| v.value.clone())
                .collect();
            values.insert(
                value.value.clone(),
                ContentDimensionValue {
                    value: value.value.clone(),
                    specialization_depth: depths.get(value.value.as_str()).copied().unwrap_or(0),
                    generalization: value.generalization.clone(),
                    specializations,
                    constraints: value
                        .constraints
                        .iter()
                        .map(|(k, m)| (k.clone(), ValueConstraints::from_map(m)))
                        .collect(),
                },
            );
        }

        Ok(Self {
            id: config.id.clone(),
            values,
            order: config.values.iter().map(|v| v.value.clone()).collect(),
        })
    }
}

/// All configured dimensions, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDimensionSource {
    dimensions: Vec<ContentDimension>,
}

impl ContentDimensionSource {
    /// Validate configuration into a dimension source.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionConfigError`] for duplicate or empty declarations,
    /// dangling generalizations, generalization cycles, or constraints that
    /// reference unknown dimensions.
    pub fn from_config(configs: &[DimensionConfig]) -> Result<Self, DimensionConfigError> {
        let mut ids = BTreeSet::new();
        for config in configs {
            if config.id.trim().is_empty() {
                return Err(DimensionConfigError::EmptyDimensionId);
            }
            if !ids.insert(config.id.as_str()) {
                return Err(DimensionConfigError::DuplicateDimension(config.id.clone()));
            }
        }

        let dimensions = configs
            .iter()
            .map(|c| ContentDimension::from_config(c, &ids))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dimensions })
    }

    #[must_use]
    pub fn dimensions(&self) -> &[ContentDimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn dimension(&self, id: &str) -> Option<&ContentDimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    /// Largest specialization depth over all dimensions.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.dimensions
            .iter()
            .map(ContentDimension::max_depth)
            .max()
            .unwrap_or(0)
    }

    /// Whether every coordinate of `point` names a configured value and all
    /// dimensions are present.
    #[must_use]
    pub fn is_well_formed(&self, point: &DimensionSpacePoint) -> bool {
        point.coordinates().len() == self.dimensions.len()
            && self.dimensions.iter().all(|d| {
                point
                    .coordinate(&d.id)
                    .is_some_and(|v| d.value(v).is_some())
            })
    }
}
