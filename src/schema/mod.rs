//! Typed schemas for event payloads.
//!
//! An event type declares a [`Mapping`]: a nested tree of field names to
//! [`FieldType`]s. [`compile`] turns it into a [`CompiledSchema`] the content
//! store enforces strictly, and [`validate`] checks runtime payloads against
//! the declared mapping.
//!
//! The raw and compiled forms are distinct types: only a `Mapping` can be
//! compiled, so compiling an already-compiled tree is unrepresentable.

mod compile;
mod geo;
mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ValidationError;

pub use compile::compile;
pub use validate::validate;

/// Scalar field types an event type may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Long,
    Integer,
    Short,
    Byte,
    Double,
    Float,
    Boolean,
    Binary,
    Ip,
    Date,
    GeoPoint,
    GeoShape,
}

impl FieldType {
    /// All supported types.
    pub const ALL: [Self; 13] = [
        Self::String,
        Self::Long,
        Self::Integer,
        Self::Short,
        Self::Byte,
        Self::Double,
        Self::Float,
        Self::Boolean,
        Self::Binary,
        Self::Ip,
        Self::Date,
        Self::GeoPoint,
        Self::GeoShape,
    ];

    /// Declared type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Integer => "integer",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::Double => "double",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Ip => "ip",
            Self::Date => "date",
            Self::GeoPoint => "geo_point",
            Self::GeoShape => "geo_shape",
        }
    }

    /// Signed bit width for integral types.
    #[must_use]
    pub const fn integral_bits(&self) -> Option<u32> {
        match self {
            Self::Long => Some(64),
            Self::Integer => Some(32),
            Self::Short => Some(16),
            Self::Byte => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidMapping {
                reason: format!("unknown field type '{s}'"),
            })
    }
}

/// One declaration in a mapping: a scalar field or a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MappingNode {
    Field(FieldType),
    Object(Mapping),
}

/// Raw field declarations of an event type.
///
/// Parsed from JSON such as `{"num": "integer", "loc": {"lat": "double"}}`.
/// Dotted keys (`"loc.lat": "double"`) are expanded into nested objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, MappingNode>);

impl Mapping {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.0.insert(name.into(), MappingNode::Field(field_type));
        self
    }

    /// Adds a nested object.
    #[must_use]
    pub fn object(mut self, name: impl Into<String>, children: Mapping) -> Self {
        self.0.insert(name.into(), MappingNode::Object(children));
        self
    }

    /// Parses a mapping from its JSON declaration.
    pub fn from_json(value: &JsonValue) -> Result<Self, ValidationError> {
        let JsonValue::Object(obj) = value else {
            return Err(ValidationError::InvalidMapping {
                reason: "mapping must be a JSON object".to_string(),
            });
        };

        let mut mapping = Self::new();
        for (key, decl) in obj {
            let segments = split_path(key)?;
            let node = match decl {
                JsonValue::String(type_name) => MappingNode::Field(type_name.parse()?),
                JsonValue::Object(_) => MappingNode::Object(Self::from_json(decl)?),
                other => {
                    return Err(ValidationError::InvalidMapping {
                        reason: format!("field '{key}' must declare a type name or object, got {other}"),
                    })
                }
            };
            mapping.insert_path(key, &segments, node)?;
        }

        if mapping.is_empty() {
            return Err(ValidationError::InvalidMapping {
                reason: "mapping declares no fields".to_string(),
            });
        }
        Ok(mapping)
    }

    fn insert_path(
        &mut self,
        full_key: &str,
        segments: &[&str],
        node: MappingNode,
    ) -> Result<(), ValidationError> {
        let clash = || ValidationError::InvalidMapping {
            reason: format!("field '{full_key}' is declared twice with conflicting shapes"),
        };

        let Some((first, rest)) = segments.split_first() else {
            return Err(clash());
        };

        if rest.is_empty() {
            return match self.0.get_mut(*first) {
                None => {
                    self.0.insert((*first).to_string(), node);
                    Ok(())
                }
                Some(MappingNode::Object(existing)) => match node {
                    MappingNode::Object(incoming) => {
                        for (k, v) in incoming.0 {
                            existing.insert_path(full_key, &[k.as_str()], v)?;
                        }
                        Ok(())
                    }
                    MappingNode::Field(_) => Err(clash()),
                },
                Some(MappingNode::Field(_)) => Err(clash()),
            };
        }

        let entry = self
            .0
            .entry((*first).to_string())
            .or_insert_with(|| MappingNode::Object(Mapping::new()));
        match entry {
            MappingNode::Object(children) => children.insert_path(full_key, rest, node),
            MappingNode::Field(_) => Err(clash()),
        }
    }

    /// Looks up a top-level declaration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MappingNode> {
        self.0.get(name)
    }

    /// Looks up the declared type of a dotted field path.
    #[must_use]
    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(seg) = segments.next() {
            match current.0.get(seg)? {
                MappingNode::Field(t) if segments.peek().is_none() => return Some(*t),
                MappingNode::Field(_) => return None,
                MappingNode::Object(children) => current = children,
            }
        }
        None
    }

    /// Returns true if a query may reference `path`: it names a declared
    /// field or object, or a sub-field of a geo field.
    #[must_use]
    pub fn declares(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = self;
        for (i, seg) in segments.iter().enumerate() {
            match current.0.get(*seg) {
                None => return false,
                Some(MappingNode::Object(children)) => current = children,
                Some(MappingNode::Field(t)) => {
                    let last = i + 1 == segments.len();
                    return last || matches!(t, FieldType::GeoPoint | FieldType::GeoShape);
                }
            }
        }
        true
    }

    /// Iterates declarations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingNode)> {
        self.0.iter()
    }

    /// Number of top-level declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON form of the declarations.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

fn split_path(key: &str) -> Result<Vec<&str>, ValidationError> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(ValidationError::InvalidMapping {
            reason: format!("field name '{key}' is empty or has an empty path segment"),
        });
    }
    Ok(segments)
}

/// Unknown-field policy of a compiled object node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dynamic {
    /// Reject any field not declared in `properties`.
    Strict,
}

/// One node of a compiled schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaNode {
    Field {
        #[serde(rename = "type")]
        field_type: FieldType,
    },
    Object {
        dynamic: Dynamic,
        properties: BTreeMap<String, SchemaNode>,
    },
}

impl SchemaNode {
    /// Strict object node over the given properties.
    #[must_use]
    pub fn strict_object(properties: BTreeMap<String, SchemaNode>) -> Self {
        Self::Object {
            dynamic: Dynamic::Strict,
            properties,
        }
    }
}

/// Store-consumable schema: the top-level `properties` of a document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledSchema {
    pub dynamic: Dynamic,
    pub properties: BTreeMap<String, SchemaNode>,
}

impl CompiledSchema {
    /// Strict schema over the given top-level properties.
    #[must_use]
    pub fn strict(properties: BTreeMap<String, SchemaNode>) -> Self {
        Self {
            dynamic: Dynamic::Strict,
            properties,
        }
    }

    /// Converts the whole schema into a nested strict object node.
    #[must_use]
    pub fn into_object_node(self) -> SchemaNode {
        SchemaNode::strict_object(self.properties)
    }

    /// Checks that `doc` carries no field undeclared at any depth.
    ///
    /// Returns the dotted path of the first undeclared field.
    pub fn check_strict(&self, doc: &JsonValue) -> Result<(), String> {
        check_object(&self.properties, doc, "")
    }
}

fn check_object(
    properties: &BTreeMap<String, SchemaNode>,
    doc: &JsonValue,
    prefix: &str,
) -> Result<(), String> {
    let JsonValue::Object(obj) = doc else {
        return Ok(());
    };
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match properties.get(key) {
            None => return Err(path),
            Some(SchemaNode::Object { properties, .. }) => match value {
                JsonValue::Array(items) => {
                    for item in items {
                        check_object(properties, item, &path)?;
                    }
                }
                other => check_object(properties, other, &path)?,
            },
            Some(SchemaNode::Field { .. }) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_type_round_trips_through_names() {
        for t in FieldType::ALL {
            assert_eq!(t.as_str().parse::<FieldType>().unwrap(), t);
        }
        assert!("varchar".parse::<FieldType>().is_err());
    }

    #[test]
    fn mapping_parses_nested_and_dotted_keys() {
        let m = Mapping::from_json(&json!({
            "num": "integer",
            "loc": {"lat": "double"},
            "loc.lon": "double",
            "a.b.c": "string"
        }))
        .unwrap();

        assert_eq!(m.field_type("num"), Some(FieldType::Integer));
        assert_eq!(m.field_type("loc.lat"), Some(FieldType::Double));
        assert_eq!(m.field_type("loc.lon"), Some(FieldType::Double));
        assert_eq!(m.field_type("a.b.c"), Some(FieldType::String));
        assert_eq!(m.field_type("loc"), None);
        assert_eq!(m.field_type("num.x"), None);
    }

    #[test]
    fn declares_fields_objects_and_geo_subfields() {
        let m = Mapping::new()
            .field("num", FieldType::Integer)
            .field("where", FieldType::GeoPoint)
            .object("loc", Mapping::new().field("lat", FieldType::Double));
        assert!(m.declares("num"));
        assert!(m.declares("loc"));
        assert!(m.declares("loc.lat"));
        assert!(m.declares("where.lat"));
        assert!(!m.declares("num.x"));
        assert!(!m.declares("loc.lon"));
        assert!(!m.declares("missing"));
    }

    #[test]
    fn mapping_rejects_bad_declarations() {
        assert!(Mapping::from_json(&json!({"x": "varchar"})).is_err());
        assert!(Mapping::from_json(&json!({"x": 3})).is_err());
        assert!(Mapping::from_json(&json!({})).is_err());
        assert!(Mapping::from_json(&json!({"x": {}})).is_err());
        assert!(Mapping::from_json(&json!({"a..b": "string"})).is_err());
        assert!(Mapping::from_json(&json!({"a": "string", "a.b": "string"})).is_err());
        assert!(Mapping::from_json(&json!(["a"])).is_err());
    }

    #[test]
    fn mapping_serde_round_trip() {
        let m = Mapping::new()
            .field("num", FieldType::Integer)
            .object("loc", Mapping::new().field("lat", FieldType::Double));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, json!({"loc": {"lat": "double"}, "num": "integer"}));
        let back: Mapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn strict_check_reports_undeclared_path() {
        let schema = compile(
            &Mapping::new()
                .field("num", FieldType::Integer)
                .object("loc", Mapping::new().field("lat", FieldType::Double)),
        );
        assert!(schema.check_strict(&json!({"num": 1, "loc": {"lat": 1.0}})).is_ok());
        assert_eq!(
            schema.check_strict(&json!({"loc": {"lat": 1.0, "lon": 2.0}})),
            Err("loc.lon".to_string())
        );
        assert_eq!(schema.check_strict(&json!({"other": 1})), Err("other".to_string()));
    }
}
