//! Node type schema: a read-only snapshot handed to the command layer.
//!
//! Declarations are inherited from super types in declaration order and the
//! node type's own declarations win. Child constraints follow the nearest
//! match: an entry for the type itself, then for the closest super type, then
//! the `*` wildcard. Without any match a child type is denied.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use super::ids::{NodeName, NodeTypeName, PropertyName, ReferenceName};
use super::property::{
    PropertyError, PropertyScope, PropertyType, PropertyValue, SerializedPropertyValues,
};

// ---------------------------------------------------------------------------
// Configuration shape
// ---------------------------------------------------------------------------

/// A `[node_types."name"]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub super_types: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyConfig>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceConfig>,
    /// Child name -> node type of the tethered child.
    #[serde(default)]
    pub tethered: BTreeMap<String, String>,
    /// Child node type (or `*`) -> allowed.
    #[serde(default)]
    pub constraints: BTreeMap<String, bool>,
    /// Tethered child name -> constraints for that child's children.
    #[serde(default)]
    pub tethered_constraints: BTreeMap<String, BTreeMap<String, bool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub scope: PropertyScope,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Allowed target node types (or `*`). Empty means any type.
    #[serde(default)]
    pub node_types: BTreeMap<String, bool>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub scope: PropertyScope,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeTypeConfigError {
    #[error("node type '{node_type}' extends unknown node type '{super_type}'")]
    UnknownSuperType {
        node_type: String,
        super_type: String,
    },

    #[error("node type inheritance forms a cycle through '{0}'")]
    InheritanceCycle(String),

    #[error("node type '{0}' contains itself through its tethered children")]
    TetheredCycle(String),

    #[error("invalid default for node type '{node_type}': {source}")]
    InvalidDefault {
        node_type: String,
        source: PropertyError,
    },
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDeclaration {
    pub property_type: PropertyType,
    pub default: Option<PropertyValue>,
    pub scope: PropertyScope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDeclaration {
    pub target_constraints: NodeTypeConstraints,
    pub max_items: Option<usize>,
    pub scope: PropertyScope,
    pub properties: BTreeMap<PropertyName, PropertyDeclaration>,
}

/// Allowed child (or reference target) node types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTypeConstraints {
    entries: BTreeMap<String, bool>,
}

impl NodeTypeConstraints {
    #[must_use]
    pub const fn new(entries: BTreeMap<String, bool>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `candidate` passes these constraints.
    #[must_use]
    pub fn allows(&self, candidate: &NodeType) -> bool {
        if let Some(allowed) = self.entries.get(candidate.name.as_str()) {
            return *allowed;
        }
        for ancestor in &candidate.ancestors {
            if let Some(allowed) = self.entries.get(ancestor.as_str()) {
                return *allowed;
            }
        }
        self.entries.get("*").copied().unwrap_or(false)
    }

    /// Overlay `other` on top of these constraints.
    fn merge(&mut self, other: &Self) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), *v);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeType {
    pub name: NodeTypeName,
    pub is_abstract: bool,
    /// Direct super types, as declared.
    pub super_types: Vec<NodeTypeName>,
    /// All super types, nearest first.
    pub ancestors: Vec<NodeTypeName>,
    pub properties: BTreeMap<PropertyName, PropertyDeclaration>,
    pub references: BTreeMap<ReferenceName, ReferenceDeclaration>,
    pub tethered: BTreeMap<NodeName, NodeTypeName>,
    pub child_constraints: NodeTypeConstraints,
    pub tethered_constraints: BTreeMap<NodeName, NodeTypeConstraints>,
}

impl NodeType {
    #[must_use]
    pub fn is_of_type(&self, name: &str) -> bool {
        self.name.as_str() == name || self.ancestors.iter().any(|a| a.as_str() == name)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_of_type(NodeTypeName::ROOT)
    }

    #[must_use]
    pub fn property(&self, name: &PropertyName) -> Option<&PropertyDeclaration> {
        self.properties.get(name)
    }

    #[must_use]
    pub fn reference(&self, name: &ReferenceName) -> Option<&ReferenceDeclaration> {
        self.references.get(name)
    }

    /// Declared defaults, used when a node is created.
    #[must_use]
    pub fn default_values(&self) -> SerializedPropertyValues {
        self.properties
            .iter()
            .filter_map(|(name, decl)| decl.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    #[must_use]
    pub fn allows_child(&self, child: &Self) -> bool {
        self.child_constraints.allows(child)
    }

    /// Whether the tethered child `tethered_name` of this type may hold a
    /// child of type `grandchild`.
    #[must_use]
    pub fn allows_grandchild(&self, tethered_name: &NodeName, grandchild: &Self) -> bool {
        self.tethered_constraints
            .get(tethered_name)
            .is_some_and(|c| c.allows(grandchild))
    }
}

/// All node types of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTypeManager {
    types: BTreeMap<NodeTypeName, NodeType>,
}

impl Default for NodeTypeManager {
    fn default() -> Self {
        Self::from_config(&BTreeMap::new()).unwrap_or_else(|_| Self {
            types: BTreeMap::new(),
        })
    }
}

impl NodeTypeManager {
    /// Resolve inheritance and validate defaults.
    ///
    /// The built-in root type is always present.
    ///
    /// # Errors
    ///
    /// Returns [`NodeTypeConfigError`] for unknown super types, inheritance
    /// cycles or defaults that do not match their declared type.
    pub fn from_config(
        configs: &BTreeMap<String, NodeTypeConfig>,
    ) -> Result<Self, NodeTypeConfigError> {
        let mut configs = configs.clone();
        configs.entry(NodeTypeName::ROOT.to_string()).or_default();

        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (name, config) in &configs {
            graph.add_node(name.as_str());
            for super_type in &config.super_types {
                if !configs.contains_key(super_type) {
                    return Err(NodeTypeConfigError::UnknownSuperType {
                        node_type: name.clone(),
                        super_type: super_type.clone(),
                    });
                }
                graph.add_edge(super_type.as_str(), name.as_str(), ());
            }
        }
        let order = toposort(&graph, None)
            .map_err(|cycle| NodeTypeConfigError::InheritanceCycle(cycle.node_id().to_string()))?;

        let mut types: BTreeMap<NodeTypeName, NodeType> = BTreeMap::new();
        for name in order {
            let Some(config) = configs.get(name) else {
                continue;
            };
            let node_type = resolve(name, config, &types)?;
            types.insert(node_type.name.clone(), node_type);
        }

        for name in types.keys() {
            if tethers_itself(name, &types) {
                return Err(NodeTypeConfigError::TetheredCycle(name.to_string()));
            }
        }

        tracing::debug!(node_types = types.len(), "loaded node types");
        Ok(Self { types })
    }

    #[must_use]
    pub fn get(&self, name: &NodeTypeName) -> Option<&NodeType> {
        self.types.get(name)
    }

    #[must_use]
    pub fn has(&self, name: &NodeTypeName) -> bool {
        self.types.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }
}

/// Whether creating a node of type `start` would create another `start`
/// somewhere below it through tethered children.
fn tethers_itself(start: &NodeTypeName, types: &BTreeMap<NodeTypeName, NodeType>) -> bool {
    let mut seen = BTreeSet::new();
    let mut pending: Vec<&NodeTypeName> = types
        .get(start)
        .map(|t| t.tethered.values().collect())
        .unwrap_or_default();
    while let Some(current) = pending.pop() {
        if current == start {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(node_type) = types.get(current) {
            pending.extend(node_type.tethered.values());
        }
    }
    false
}

fn resolve(
    name: &str,
    config: &NodeTypeConfig,
    resolved: &BTreeMap<NodeTypeName, NodeType>,
) -> Result<NodeType, NodeTypeConfigError> {
    let super_types: Vec<NodeTypeName> = config
        .super_types
        .iter()
        .map(|s| NodeTypeName::new(s.as_str()))
        .collect();

    // Breadth-first, so nearer ancestors come first.
    let mut ancestors = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<NodeTypeName> = super_types.iter().cloned().collect();
    while let Some(ancestor) = queue.pop_front() {
        if !seen.insert(ancestor.clone()) {
            continue;
        }
        if let Some(parent) = resolved.get(&ancestor) {
            queue.extend(parent.super_types.iter().cloned());
        }
        ancestors.push(ancestor);
    }

    let mut node_type = NodeType {
        name: NodeTypeName::new(name),
        is_abstract: config.is_abstract,
        super_types,
        ancestors,
        properties: BTreeMap::new(),
        references: BTreeMap::new(),
        tethered: BTreeMap::new(),
        child_constraints: NodeTypeConstraints::default(),
        tethered_constraints: BTreeMap::new(),
    };

    for super_type in &node_type.super_types {
        if let Some(parent) = resolved.get(super_type) {
            node_type.properties.extend(parent.properties.clone());
            node_type.references.extend(parent.references.clone());
            node_type.tethered.extend(parent.tethered.clone());
            node_type.child_constraints.merge(&parent.child_constraints);
            for (child, constraints) in &parent.tethered_constraints {
                node_type
                    .tethered_constraints
                    .entry(child.clone())
                    .or_default()
                    .merge(constraints);
            }
        }
    }

    let invalid_default = |source| NodeTypeConfigError::InvalidDefault {
        node_type: name.to_string(),
        source,
    };
    for (property, decl) in &config.properties {
        node_type.properties.insert(
            PropertyName::new(property.as_str()),
            declaration(property, decl).map_err(invalid_default)?,
        );
    }
    for (reference, decl) in &config.references {
        let properties = decl
            .properties
            .iter()
            .map(|(p, d)| declaration(p, d).map(|d| (PropertyName::new(p.as_str()), d)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(invalid_default)?;
        node_type.references.insert(
            ReferenceName::new(reference.as_str()),
            ReferenceDeclaration {
                target_constraints: NodeTypeConstraints::new(decl.node_types.clone()),
                max_items: decl.max_items,
                scope: decl.scope,
                properties,
            },
        );
    }
    for (child, child_type) in &config.tethered {
        node_type
            .tethered
            .insert(NodeName::new(child.as_str()), NodeTypeName::new(child_type.as_str()));
    }
    node_type
        .child_constraints
        .merge(&NodeTypeConstraints::new(config.constraints.clone()));
    for (child, constraints) in &config.tethered_constraints {
        node_type
            .tethered_constraints
            .entry(NodeName::new(child.as_str()))
            .or_default()
            .merge(&NodeTypeConstraints::new(constraints.clone()));
    }

    Ok(node_type)
}

fn declaration(name: &str, config: &PropertyConfig) -> Result<PropertyDeclaration, PropertyError> {
    let default = config
        .default
        .as_ref()
        .map(|json| PropertyValue::from_json(&PropertyName::new(name), config.property_type, json))
        .transpose()?;
    Ok(PropertyDeclaration {
        property_type: config.property_type,
        default,
        scope: config.scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(toml_src: &str) -> NodeTypeManager {
        let configs: BTreeMap<String, NodeTypeConfig> = toml::from_str(toml_src).expect("toml");
        NodeTypeManager::from_config(&configs).expect("valid node types")
    }

    const TYPES: &str = r#"
        ["acme:Sites"]
        super_types = ["dimgraph:Root"]
        constraints = { "acme:Document" = true }

        ["acme:Document"]
        abstract = true
        constraints = { "*" = true, "acme:Text" = false }
        properties.title = { type = "string", default = "Untitled" }

        ["acme:Page"]
        super_types = ["acme:Document"]
        tethered = { main = "acme:Collection" }
        tethered_constraints = { main = { "acme:Text" = true } }
        properties.hidden = { type = "boolean", scope = "nodeAggregate" }
        references.related = { node_types = { "acme:Page" = true }, max_items = 2 }

        ["acme:Collection"]

        ["acme:Text"]
    "#;

    #[test]
    fn inheritance_merges_declarations() {
        let m = manager(TYPES);
        let page = m.get(&NodeTypeName::new("acme:Page")).expect("page");
        assert!(!page.is_abstract);
        assert!(page.is_of_type("acme:Document"));
        assert!(page.property(&PropertyName::new("title")).is_some());
        assert_eq!(
            page.property(&PropertyName::new("hidden")).map(|d| d.scope),
            Some(PropertyScope::NodeAggregate)
        );
        assert_eq!(
            page.default_values().get_str(&PropertyName::new("title")),
            Ok("Untitled")
        );
    }

    #[test]
    fn root_types_are_detected() {
        let m = manager(TYPES);
        assert!(m.get(&NodeTypeName::new("acme:Sites")).is_some_and(NodeType::is_root));
        assert!(m.get(&NodeTypeName::root()).is_some_and(NodeType::is_root));
        assert!(!m.get(&NodeTypeName::new("acme:Page")).is_some_and(NodeType::is_root));
    }

    #[test]
    fn constraints_use_nearest_match() {
        let m = manager(TYPES);
        let page = m.get(&NodeTypeName::new("acme:Page")).expect("page");
        let text = m.get(&NodeTypeName::new("acme:Text")).expect("text");
        let collection = m.get(&NodeTypeName::new("acme:Collection")).expect("collection");
        assert!(!page.allows_child(text));
        assert!(page.allows_child(collection));
        assert!(page.allows_child(page));
        assert!(page.allows_grandchild(&NodeName::new("main"), text));
        assert!(!page.allows_grandchild(&NodeName::new("main"), collection));

        let sites = m.get(&NodeTypeName::new("acme:Sites")).expect("sites");
        // Page has no entry of its own but inherits from Document.
        assert!(sites.allows_child(page));
        assert!(!sites.allows_child(text));
    }

    #[test]
    fn unknown_super_type_is_rejected() {
        let configs: BTreeMap<String, NodeTypeConfig> =
            toml::from_str(r#"["a:B"]
super_types = ["a:Missing"]"#)
                .expect("toml");
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeConfigError::UnknownSuperType { .. })
        ));
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let configs: BTreeMap<String, NodeTypeConfig> = toml::from_str(
            r#"
            ["a:A"]
            super_types = ["a:B"]
            ["a:B"]
            super_types = ["a:A"]
        "#,
        )
        .expect("toml");
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeConfigError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn tethered_cycle_is_rejected() {
        let configs: BTreeMap<String, NodeTypeConfig> = toml::from_str(
            r#"
            ["a:Page"]
            tethered = { main = "a:Main" }
            ["a:Main"]
            tethered = { again = "a:Page" }
        "#,
        )
        .expect("toml");
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeConfigError::TetheredCycle(_))
        ));
    }

    #[test]
    fn mistyped_default_is_rejected() {
        let configs: BTreeMap<String, NodeTypeConfig> = toml::from_str(
            r#"
            ["a:A"]
            properties.count = { type = "integer", default = "many" }
        "#,
        )
        .expect("toml");
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeConfigError::InvalidDefault { .. })
        ));
    }
}
