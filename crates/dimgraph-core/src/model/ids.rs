//! Identifier and name newtypes.
//!
//! Identifiers that become storage keys ([`NodeAggregateId`],
//! [`ContentStreamId`], [`WorkspaceName`]) are validated on construction.
//! Names that only ever come from configuration are accepted as-is.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

fn validate_slug(
    kind: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), InvalidId> {
    let fail = |reason| InvalidId {
        kind,
        value: value.to_string(),
        reason,
    };
    if value.is_empty() {
        return Err(fail("must not be empty"));
    }
    if value.len() > max_len {
        return Err(fail("too long"));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(fail("only lowercase letters, digits and '-' are allowed"));
    }
    Ok(())
}

macro_rules! slug_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $max:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse and validate.
            ///
            /// # Errors
            ///
            /// Returns [`InvalidId`] for empty, overlong or non-slug input.
            pub fn new(value: impl Into<String>) -> Result<Self, InvalidId> {
                let value = value.into();
                validate_slug($kind, &value, $max)?;
                Ok(Self(value))
            }

            /// Wrap a value that is already known to be valid.
            #[must_use]
            pub fn new_unchecked(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

macro_rules! plain_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

slug_id!(
    /// Stable identity of a node across dimensions and time.
    NodeAggregateId,
    "node aggregate id",
    64
);

slug_id!(
    /// Identity of one append-only content timeline.
    ContentStreamId,
    "content stream id",
    64
);

slug_id!(
    /// Human-facing workspace name.
    WorkspaceName,
    "workspace name",
    36
);

plain_name!(
    /// Fully qualified node type name, e.g. `acme:Page`.
    NodeTypeName
);

plain_name!(
    /// Name of a node below its parent; tethered children are addressed by it.
    NodeName
);

plain_name!(PropertyName);

plain_name!(ReferenceName);

impl NodeAggregateId {
    /// Deterministic id for a tethered descendant, derived from the id of the
    /// node that creates it and the path of node names leading to it.
    ///
    /// Replaying the same creation (e.g. during a rebase) therefore yields the
    /// same descendant ids.
    #[must_use]
    pub fn for_tethered_descendant(ancestor: &Self, path: &[NodeName]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ancestor.as_str().as_bytes());
        for name in path {
            hasher.update(b"/");
            hasher.update(name.as_str().as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        Self(format!("t-{}", &hex[..24]))
    }
}

impl ContentStreamId {
    /// Fresh random id for a stream created outside of a command, e.g. from
    /// the CLI. A lowercase hyphenated v4 uuid is always a valid slug.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("cs-{}", Uuid::new_v4()))
    }
}

impl WorkspaceName {
    /// The root workspace everything is eventually published to.
    #[must_use]
    pub fn live() -> Self {
        Self("live".to_string())
    }
}

impl NodeTypeName {
    /// Built-in supertype of every root node type.
    pub const ROOT: &'static str = "dimgraph:Root";

    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }
}

/// Path of node names from an ancestor to a tethered descendant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    #[must_use]
    pub fn from_names(names: &[NodeName]) -> Self {
        Self(
            names
                .iter()
                .map(NodeName::as_str)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
