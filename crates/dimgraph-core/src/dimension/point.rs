//! Dimension space points: coordinates in the cross product of all content
//! dimensions.
//!
//! A [`DimensionSpacePoint`] is an ordered map from dimension id to value.
//! The map is a `BTreeMap`, so iteration order and the canonical JSON used for
//! hashing are stable regardless of how the point was constructed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of the hex hash prefix used as a storage key.
const HASH_HEX_LEN: usize = 32;

/// A coordinate in the dimension space, e.g. `{language: de, market: CH}`.
///
/// Serializes as a plain JSON object of coordinates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePoint {
    coordinates: BTreeMap<String, String>,
}

impl DimensionSpacePoint {
    /// The point of a dimensionless repository, also the origin of root nodes.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            coordinates: BTreeMap::new(),
        }
    }

    /// Build a point from `(dimension, value)` pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            coordinates: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub const fn coordinates(&self) -> &BTreeMap<String, String> {
        &self.coordinates
    }

    #[must_use]
    pub fn coordinate(&self, dimension: &str) -> Option<&str> {
        self.coordinates.get(dimension).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Copy of this point with one coordinate replaced.
    #[must_use]
    pub fn vary(&self, dimension: &str, value: &str) -> Self {
        let mut coordinates = self.coordinates.clone();
        coordinates.insert(dimension.to_string(), value.to_string());
        Self { coordinates }
    }

    /// Stable content hash (hex blake3 over the canonical JSON coordinates).
    ///
    /// Used as the storage key for points in projections.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"{");
        for (i, (dimension, value)) in self.coordinates.iter().enumerate() {
            if i > 0 {
                hasher.update(b",");
            }
            // JSON-escape both halves so "a":"b" can never collide with a
            // differently split pair.
            hasher.update(json_string(dimension).as_bytes());
            hasher.update(b":");
            hasher.update(json_string(value).as_bytes());
        }
        hasher.update(b"}");
        let hex = hasher.finalize().to_hex();
        hex[..HASH_HEX_LEN].to_string()
    }
}

fn json_string(raw: &str) -> String {
    serde_json::Value::String(raw.to_string()).to_string()
}

impl fmt::Display for DimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (dimension, value)) in self.coordinates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dimension}: {value}")?;
        }
        f.write_str("}")
    }
}

/// The point at which a node variant was authored.
///
/// Structurally identical to a [`DimensionSpacePoint`]; the separate type keeps
/// "occupied" and "covered" from being mixed up in signatures.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginDimensionSpacePoint(DimensionSpacePoint);

impl OriginDimensionSpacePoint {
    #[must_use]
    pub const fn empty() -> Self {
        Self(DimensionSpacePoint::empty())
    }

    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(DimensionSpacePoint::from_pairs(pairs))
    }

    #[must_use]
    pub const fn from_point(point: DimensionSpacePoint) -> Self {
        Self(point)
    }

    #[must_use]
    pub const fn as_point(&self) -> &DimensionSpacePoint {
        &self.0
    }

    #[must_use]
    pub fn to_point(&self) -> DimensionSpacePoint {
        self.0.clone()
    }

    #[must_use]
    pub fn content_hash(&self) -> String {
        self.0.content_hash()
    }
}

impl From<DimensionSpacePoint> for OriginDimensionSpacePoint {
    fn from(point: DimensionSpacePoint) -> Self {
        Self(point)
    }
}

impl fmt::Display for OriginDimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An ordered set of points.
pub type DimensionSpacePointSet = BTreeSet<DimensionSpacePoint>;

/// An ordered set of origins.
pub type OriginDimensionSpacePointSet = BTreeSet<OriginDimensionSpacePoint>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_independent_of_insertion_order() {
        let a = DimensionSpacePoint::from_pairs([("language", "de"), ("market", "CH")]);
        let b = DimensionSpacePoint::from_pairs([("market", "CH"), ("language", "de")]);
        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), HASH_HEX_LEN);
    }

    #[test]
    fn hash_distinguishes_split_points() {
        let a = DimensionSpacePoint::from_pairs([("a", "b:c")]);
        let b = DimensionSpacePoint::from_pairs([("a:b", "c")]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn serializes_as_plain_object() {
        let p = DimensionSpacePoint::from_pairs([("language", "en")]);
        let json = serde_json::to_string(&p).expect("serialize");
        assert_eq!(json, r#"{"language":"en"}"#);
        let origin: OriginDimensionSpacePoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(origin.as_point(), &p);
    }

    #[test]
    fn vary_replaces_one_coordinate() {
        let p = DimensionSpacePoint::from_pairs([("language", "en"), ("market", "DE")]);
        let q = p.vary("language", "de");
        assert_eq!(q.coordinate("language"), Some("de"));
        assert_eq!(q.coordinate("market"), Some("DE"));
        assert_eq!(p.coordinate("language"), Some("en"));
    }

    #[test]
    fn display_lists_coordinates() {
        let p = DimensionSpacePoint::from_pairs([("language", "en")]);
        assert_eq!(p.to_string(), "{language: en}");
        assert_eq!(DimensionSpacePoint::empty().to_string(), "{}");
    }
}
