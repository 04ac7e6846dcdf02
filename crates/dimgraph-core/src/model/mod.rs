//! Identifiers, node type schema and property values.

pub mod ids;
pub mod node_type;
pub mod property;

pub use ids::{
    ContentStreamId, InvalidId, NodeAggregateId, NodeName, NodePath, NodeTypeName, PropertyName,
    ReferenceName, WorkspaceName,
};
pub use node_type::{NodeType, NodeTypeConfig, NodeTypeConfigError, NodeTypeManager};
pub use property::{
    PropertyError, PropertyScope, PropertyType, PropertyValue, PropertyValuesToWrite,
    SerializedPropertyValues,
};

use serde::{Deserialize, Serialize};

/// Structural role of a node aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeAggregateClassification {
    Root,
    Regular,
    Tethered,
}

impl NodeAggregateClassification {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Regular => "regular",
            Self::Tethered => "tethered",
        }
    }
}

/// Lifecycle state of a content stream.
///
/// Reopening a closed stream restores the state it had when it was closed,
/// so `Closed` is never recorded as a previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentStreamState {
    /// Created or forked; no content events yet.
    New,
    /// At least one content event has been appended.
    Open,
    Closed,
}

impl ContentStreamState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Parse the `as_str` form; used when reading projection rows.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(Self::New),
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Whether a workspace has seen everything its base has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceStatus {
    UpToDate,
    /// The base changed since the workspace was forked or last rebased.
    Outdated,
}

impl WorkspaceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "upToDate",
            Self::Outdated => "outdated",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upToDate" => Some(Self::UpToDate),
            "outdated" => Some(Self::Outdated),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_round_trip_their_column_form() {
        for state in [
            ContentStreamState::New,
            ContentStreamState::Open,
            ContentStreamState::Closed,
        ] {
            assert_eq!(ContentStreamState::parse(state.as_str()), Some(state));
        }
        for status in [WorkspaceStatus::UpToDate, WorkspaceStatus::Outdated] {
            assert_eq!(WorkspaceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContentStreamState::parse("reopened"), None);
    }
}
