//! Typed property values.
//!
//! Property bags are a tagged union of primitive value kinds. On the wire a
//! value is `{"type": <kind>, "value": <payload>}` so it can be decoded
//! without consulting the node type schema. Writes are checked against the
//! declared [`PropertyType`] before any event is produced.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::PropertyName;

// ---------------------------------------------------------------------------
// PropertyValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Kind tag as used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Decode an untyped JSON value (e.g. a configured default) as `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::TypeMismatch`] when the JSON shape does not
    /// fit the declared type.
    pub fn from_json(
        name: &PropertyName,
        expected: PropertyType,
        json: &serde_json::Value,
    ) -> Result<Self, PropertyError> {
        use serde_json::Value;

        let mismatch = || PropertyError::TypeMismatch {
            property: name.clone(),
            expected,
            actual: json_kind(json),
        };
        match (expected, json) {
            (PropertyType::Boolean, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (PropertyType::Integer, Value::Number(n)) => {
                n.as_i64().map(Self::Int).ok_or_else(mismatch)
            }
            (PropertyType::Float, Value::Number(n)) => {
                n.as_f64().map(Self::Float).ok_or_else(mismatch)
            }
            (PropertyType::String, Value::String(s)) => Ok(Self::String(s.clone())),
            (PropertyType::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|d| Self::Date(d.with_timezone(&Utc)))
                .map_err(|_| mismatch()),
            (PropertyType::Array, Value::Array(_)) | (PropertyType::Object, Value::Object(_)) => {
                Self::infer(json).ok_or_else(mismatch)
            }
            _ => Err(mismatch()),
        }
    }

    /// Best-effort decoding of untyped JSON; `null` has no representation.
    #[must_use]
    pub fn infer(json: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match json {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::infer)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Self::infer(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Object),
        }
    }
}

const fn json_kind(json: &serde_json::Value) -> &'static str {
    use serde_json::Value;

    match json {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// PropertyType
// ---------------------------------------------------------------------------

/// Declared type of a property in a node type schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Array,
    Object,
}

impl PropertyType {
    pub const ALL: [Self; 7] = [
        Self::Boolean,
        Self::Integer,
        Self::Float,
        Self::String,
        Self::Date,
        Self::Array,
        Self::Object,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` is a valid value of this type.
    #[must_use]
    pub const fn accepts(self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (Self::Boolean, PropertyValue::Bool(_))
                | (Self::Integer, PropertyValue::Int(_))
                | (Self::Float, PropertyValue::Float(_) | PropertyValue::Int(_))
                | (Self::String, PropertyValue::String(_))
                | (Self::Date, PropertyValue::Date(_))
                | (Self::Array, PropertyValue::Array(_))
                | (Self::Object, PropertyValue::Object(_))
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PropertyError::UnknownType(s.to_string()))
    }
}

impl Serialize for PropertyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PropertyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which variants of an aggregate a write reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyScope {
    /// Only the variant at the given origin.
    #[default]
    Node,
    /// The variant at the origin and every occupied specialization of it.
    Specializations,
    /// Every variant of the aggregate.
    NodeAggregate,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property '{0}' is not set")]
    Missing(PropertyName),

    #[error("property '{property}' expects {expected}, got {actual}")]
    TypeMismatch {
        property: PropertyName,
        expected: PropertyType,
        actual: &'static str,
    },

    #[error("unknown property type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Property bags
// ---------------------------------------------------------------------------

/// Property values as stored on a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedPropertyValues(BTreeMap<PropertyName, PropertyValue>);

impl SerializedPropertyValues {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Typed-or-error access by name.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::Missing`] when the property is not set.
    pub fn get(&self, name: &PropertyName) -> Result<&PropertyValue, PropertyError> {
        self.0
            .get(name)
            .ok_or_else(|| PropertyError::Missing(name.clone()))
    }

    /// String access; a set property of another kind is a type mismatch.
    ///
    /// # Errors
    ///
    /// [`PropertyError::Missing`] or [`PropertyError::TypeMismatch`].
    pub fn get_str(&self, name: &PropertyName) -> Result<&str, PropertyError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| PropertyError::TypeMismatch {
            property: name.clone(),
            expected: PropertyType::String,
            actual: value.kind(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &PropertyName) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: PropertyName, value: PropertyValue) {
        self.0.insert(name, value);
    }

    pub fn remove(&mut self, name: &PropertyName) -> Option<PropertyValue> {
        self.0.remove(name)
    }

    /// Overlay `other` on top of these values.
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyName, &PropertyValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &PropertyName> {
        self.0.keys()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(PropertyName, PropertyValue)> for SerializedPropertyValues {
    fn from_iter<T: IntoIterator<Item = (PropertyName, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Property writes of a command: `None` unsets the property.
pub type PropertyValuesToWrite = BTreeMap<PropertyName, Option<PropertyValue>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PropertyName {
        PropertyName::new(s)
    }

    #[test]
    fn wire_shape_is_tagged() {
        let value = PropertyValue::String("Hello".into());
        let json = serde_json::to_string(&value).expect("serialize");
        assert_eq!(json, r#"{"type":"string","value":"Hello"}"#);
        let back: PropertyValue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, value);

        let nested = PropertyValue::Array(vec![PropertyValue::Int(1), PropertyValue::Bool(false)]);
        let json = serde_json::to_value(&nested).expect("serialize");
        assert_eq!(json["type"], "array");
        assert_eq!(json["value"][0]["type"], "int");
    }

    #[test]
    fn missing_property_is_an_error_not_null() {
        let values = SerializedPropertyValues::new();
        assert_eq!(
            values.get(&name("title")),
            Err(PropertyError::Missing(name("title")))
        );
    }

    #[test]
    fn get_str_reports_kind_mismatch() {
        let values: SerializedPropertyValues =
            [(name("count"), PropertyValue::Int(3))].into_iter().collect();
        let err = values.get_str(&name("count")).expect_err("mismatch");
        assert!(matches!(err, PropertyError::TypeMismatch { actual: "int", .. }));
    }

    #[test]
    fn from_json_checks_declared_type() {
        let title = name("title");
        assert_eq!(
            PropertyValue::from_json(&title, PropertyType::String, &serde_json::json!("x")),
            Ok(PropertyValue::String("x".into()))
        );
        assert!(
            PropertyValue::from_json(&title, PropertyType::Integer, &serde_json::json!("x"))
                .is_err()
        );
        let date =
            PropertyValue::from_json(
                &title,
                PropertyType::Date,
                &serde_json::json!("2024-01-02T03:04:05Z"),
            )
                .expect("date");
        assert_eq!(date.kind(), "date");
    }

    #[test]
    fn float_accepts_integers() {
        assert!(PropertyType::Float.accepts(&PropertyValue::Int(2)));
        assert!(!PropertyType::Integer.accepts(&PropertyValue::Float(2.5)));
    }

    #[test]
    fn property_type_parses_and_rejects_unknown() {
        assert_eq!("date".parse::<PropertyType>(), Ok(PropertyType::Date));
        assert!("decimal".parse::<PropertyType>().is_err());
    }

    #[test]
    fn merge_overlays_values() {
        let mut base: SerializedPropertyValues = [
            (name("a"), PropertyValue::Int(1)),
            (name("b"), PropertyValue::Int(2)),
        ]
        .into_iter()
        .collect();
        let overlay: SerializedPropertyValues =
            [(name("b"), PropertyValue::Int(20))].into_iter().collect();
        base.merge(&overlay);
        assert_eq!(base.get(&name("a")), Ok(&PropertyValue::Int(1)));
        assert_eq!(base.get(&name("b")), Ok(&PropertyValue::Int(20)));
    }
}
