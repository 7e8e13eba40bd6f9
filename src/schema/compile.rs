//! Mapping → strict schema compilation.

use std::collections::BTreeMap;

use super::{CompiledSchema, Mapping, MappingNode, SchemaNode};

/// Compiles a declared mapping into a strict store schema.
///
/// Leaves become `{type: T}`; nested objects become
/// `{dynamic: "strict", properties: ...}` at every depth.
#[must_use]
pub fn compile(mapping: &Mapping) -> CompiledSchema {
    CompiledSchema::strict(compile_properties(mapping))
}

fn compile_properties(mapping: &Mapping) -> BTreeMap<String, SchemaNode> {
    mapping
        .iter()
        .map(|(name, node)| (name.clone(), compile_node(node)))
        .collect()
}

fn compile_node(node: &MappingNode) -> SchemaNode {
    match node {
        MappingNode::Field(field_type) => SchemaNode::Field {
            field_type: *field_type,
        },
        MappingNode::Object(children) => SchemaNode::strict_object(compile_properties(children)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn nested(depth: usize) -> Mapping {
        let mut m = Mapping::new().field("leaf", FieldType::Long);
        for i in (0..depth).rev() {
            m = Mapping::new()
                .field(format!("f{i}"), FieldType::String)
                .object(format!("n{i}"), m);
        }
        m
    }

    #[test]
    fn leaves_and_objects_are_wrapped() {
        let mapping = Mapping::new()
            .field("num", FieldType::Integer)
            .object("loc", Mapping::new().field("lat", FieldType::Double));

        let compiled = compile(&mapping);
        assert_eq!(
            serde_json::to_value(&compiled).unwrap(),
            json!({
                "dynamic": "strict",
                "properties": {
                    "num": {"type": "integer"},
                    "loc": {
                        "dynamic": "strict",
                        "properties": {"lat": {"type": "double"}}
                    }
                }
            })
        );
    }

    #[test]
    fn deep_nesting_is_wrapped_at_every_level() {
        let compiled = compile(&nested(12));

        let mut props = &compiled.properties;
        for i in 0..12 {
            assert_eq!(
                props.get(&format!("f{i}")),
                Some(&SchemaNode::Field {
                    field_type: FieldType::String
                })
            );
            match props.get(&format!("n{i}")) {
                Some(SchemaNode::Object { properties, .. }) => props = properties,
                other => panic!("expected strict object at depth {i}, got {other:?}"),
            }
        }
        assert_eq!(
            props.get("leaf"),
            Some(&SchemaNode::Field {
                field_type: FieldType::Long
            })
        );
    }

    #[test]
    fn compiled_schema_deserializes_back() {
        let compiled = compile(&nested(3));
        let json = serde_json::to_value(&compiled).unwrap();
        let back: CompiledSchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, compiled);
    }
}
