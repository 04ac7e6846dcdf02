//! Repository configuration.
//!
//! One TOML file (`dimgraph.toml`) declares dimensions, node types and the
//! runtime knobs of the engine. It is loaded once into an immutable
//! [`RepositoryConfig`] and passed around explicitly. Every section is
//! optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dimension::{
    ContentDimensionSource, DimensionConfig, DimensionConfigError, InterDimensionalVariationGraph,
};
use crate::model::{NodeTypeConfig, NodeTypeConfigError, NodeTypeManager};

/// Default file name looked up by the CLI.
pub const CONFIG_FILE_NAME: &str = "dimgraph.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default)]
    pub node_types: BTreeMap<String, NodeTypeConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Events fetched from the store per catch-up batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts at a failing event before a subscription stays in error.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_max_concurrency_retries")]
    pub max_concurrency_retries: u32,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            max_concurrency_retries: default_max_concurrency_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

const fn default_batch_size() -> usize {
    500
}

const fn default_max_retry_attempts() -> u32 {
    3
}

const fn default_max_concurrency_retries() -> u32 {
    3
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid dimension configuration: {0}")]
    Dimensions(#[from] DimensionConfigError),

    #[error("invalid node type configuration: {0}")]
    NodeTypes(#[from] NodeTypeConfigError),

    #[error("engine.batch_size must be at least 1")]
    ZeroBatchSize,
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> crate::error::ErrorCode {
        crate::error::ErrorCode::ConfigParseError
    }
}

impl RepositoryConfig {
    /// Load and validate `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Like [`Self::load`], but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file is invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        self.content_model().map(|_| ())
    }

    /// Build the derived, immutable model the command layer works with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid dimensions or node types.
    pub fn content_model(&self) -> Result<ContentModel, ConfigError> {
        let source = ContentDimensionSource::from_config(&self.dimensions)?;
        let node_types = NodeTypeManager::from_config(&self.node_types)?;
        Ok(ContentModel {
            variation_graph: InterDimensionalVariationGraph::new(source),
            node_types,
        })
    }
}

/// Variation graph and node types derived from a [`RepositoryConfig`].
#[derive(Debug, Clone)]
pub struct ContentModel {
    pub variation_graph: InterDimensionalVariationGraph,
    pub node_types: NodeTypeManager,
}

impl Default for ContentModel {
    fn default() -> Self {
        Self {
            variation_graph: InterDimensionalVariationGraph::new(ContentDimensionSource::default()),
            node_types: NodeTypeManager::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionSpacePoint;
    use crate::model::{NodeTypeName, PropertyName, PropertyType};

    const SAMPLE: &str = r#"
[[dimensions]]
id = "language"
values = [
    { value = "en" },
    { value = "de", generalization = "en" },
]

[node_types."acme:Sites"]
super_types = ["dimgraph:Root"]
constraints = { "acme:Page" = true }

[node_types."acme:Page"]
properties = { title = { type = "string", default = "Untitled" } }
constraints = { "*" = true }

[engine]
batch_size = 100
"#;

    #[test]
    fn missing_sections_take_defaults() {
        let config = RepositoryConfig::from_toml_str("").expect("parse");
        assert_eq!(config.engine.batch_size, 500);
        assert_eq!(config.engine.max_retry_attempts, 3);
        assert_eq!(config.commands.max_concurrency_retries, 3);
        assert_eq!(config.storage.busy_timeout(), Duration::from_secs(5));

        let model = config.content_model().expect("model");
        assert_eq!(
            model.variation_graph.allowed_dimension_subspace().len(),
            1,
            "no dimensions means exactly the empty point"
        );
        assert!(model
            .variation_graph
            .is_allowed(&DimensionSpacePoint::empty()));
    }

    #[test]
    fn sample_builds_a_content_model() {
        let config = RepositoryConfig::from_toml_str(SAMPLE).expect("parse");
        assert_eq!(config.engine.batch_size, 100);
        assert_eq!(config.engine.max_retry_attempts, 3);

        let model = config.content_model().expect("model");
        assert_eq!(model.variation_graph.allowed_dimension_subspace().len(), 2);
        let page = model
            .node_types
            .get(&NodeTypeName::new("acme:Page"))
            .expect("page type");
        let title = page.property(&PropertyName::new("title")).expect("title");
        assert_eq!(title.property_type, PropertyType::String);
        let sites = model
            .node_types
            .get(&NodeTypeName::new("acme:Sites"))
            .expect("sites type");
        assert!(sites.is_root());
    }

    #[test]
    fn invalid_dimension_is_reported() {
        let err = RepositoryConfig::from_toml_str(
            r#"
[[dimensions]]
id = "language"
values = [{ value = "de", generalization = "en" }]
"#,
        )
        .expect_err("dangling generalization");
        assert!(matches!(err, ConfigError::Dimensions(_)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = RepositoryConfig::from_toml_str("[engine]\nbatch_size = 0\n").expect_err("zero");
        assert!(matches!(err, ConfigError::ZeroBatchSize));
    }

    #[test]
    fn load_or_default_handles_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            RepositoryConfig::load_or_default(&dir.path().join(CONFIG_FILE_NAME)).expect("default");
        assert_eq!(config, RepositoryConfig::default());
    }
}
