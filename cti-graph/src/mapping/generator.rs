//! Backend field mappings generated from property schemas.

use serde_json::{json, Map, Value};

use crate::mapping::schema::{PropertyKind, PropertySchema};
use cti_graph_repository::opensearch::REF_TYPE_ANALYZER;
use cti_graph_repository::query::REF_TYPE_SUBFIELD;

impl PropertyKind {
    /// Field mapping of a single property.
    pub fn to_field_mapping(&self) -> Value {
        match self {
            PropertyKind::Boolean => json!({"type": "boolean"}),
            PropertyKind::Integer => json!({"type": "integer"}),
            PropertyKind::Float => json!({"type": "float"}),
            PropertyKind::Timestamp => json!({"type": "date"}),
            PropertyKind::Identifier | PropertyKind::String | PropertyKind::Taxonomy => {
                json!({"type": "keyword"})
            }
            PropertyKind::Text => json!({"type": "text"}),
            // The subfield splits `indicator--<uuid>` on the delimiter so a
            // reference can be matched by the type of entity it points at.
            PropertyKind::Reference | PropertyKind::ReferenceList => json!({
                "type": "keyword",
                "fields": {
                    REF_TYPE_SUBFIELD: {"type": "text", "analyzer": REF_TYPE_ANALYZER}
                }
            }),
            PropertyKind::Nested(properties) => {
                json!({"type": "nested", "properties": properties_mapping(properties.iter())})
            }
            PropertyKind::Dictionary(properties) => {
                json!({"type": "object", "properties": properties_mapping(properties.iter())})
            }
            PropertyKind::Binary => json!({"type": "binary"}),
        }
    }
}

impl PropertySchema {
    /// The `{"properties": ...}` mapping of the type's index.
    pub fn to_mapping(&self) -> Value {
        json!({ "properties": properties_mapping(self.properties().iter()) })
    }
}

fn properties_mapping<'a>(
    properties: impl Iterator<Item = (&'a String, &'a PropertyKind)>,
) -> Value {
    let fields: Map<String, Value> = properties
        .map(|(name, kind)| (name.clone(), kind.to_field_mapping()))
        .collect();
    Value::Object(fields)
}

/// Check that a live mapping already provides every field of `target`.
///
/// Fields the live mapping has beyond the target (dynamically mapped ones,
/// for instance) are ignored, so only a real change to the schema causes a
/// migration.
pub fn mapping_covers(live: &Value, target: &Value) -> bool {
    object_covers(live.get("properties"), target.get("properties"))
}

fn object_covers(live: Option<&Value>, target: Option<&Value>) -> bool {
    let Some(target) = target.and_then(Value::as_object) else {
        return true;
    };
    let Some(live) = live.and_then(Value::as_object) else {
        return target.is_empty();
    };
    target.iter().all(|(name, wanted)| match live.get(name) {
        Some(actual) => field_covers(actual, wanted),
        None => false,
    })
}

fn field_covers(live: &Value, target: &Value) -> bool {
    // Object fields are reported without an explicit type.
    let field_type = |v: &Value| {
        v.get("type")
            .and_then(Value::as_str)
            .unwrap_or("object")
            .to_string()
    };
    field_type(live) == field_type(target)
        && target
            .get("analyzer")
            .map_or(true, |analyzer| live.get("analyzer") == Some(analyzer))
        && object_covers(live.get("properties"), target.get("properties"))
        && object_covers(live.get("fields"), target.get("fields"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::schema::PropertySchemas;
    use cti_graph_shared::EntityType;
    use std::collections::BTreeMap;

    #[test]
    fn test_reference_mapping_has_type_subfield() {
        let mapping = PropertyKind::ReferenceList.to_field_mapping();
        assert_eq!(mapping["type"], "keyword");
        assert_eq!(mapping["fields"]["type"]["type"], "text");
        assert_eq!(mapping["fields"]["type"]["analyzer"], REF_TYPE_ANALYZER);
    }

    #[test]
    fn test_composite_mappings() {
        let inner: BTreeMap<String, PropertyKind> =
            [("phase_name".to_string(), PropertyKind::Taxonomy)].into();
        let nested = PropertyKind::Nested(inner.clone()).to_field_mapping();
        assert_eq!(nested["type"], "nested");
        assert_eq!(nested["properties"]["phase_name"]["type"], "keyword");

        let dictionary = PropertyKind::Dictionary(inner).to_field_mapping();
        assert_eq!(dictionary["type"], "object");
    }

    #[test]
    fn test_mapping_covers_itself() {
        let schemas = PropertySchemas::builtin();
        for (_, schema) in schemas.iter() {
            let mapping = schema.to_mapping();
            assert!(mapping_covers(&mapping, &mapping));
        }
    }

    #[test]
    fn test_mapping_covers_ignores_extra_live_fields() {
        let target = PropertySchemas::builtin()
            .get(EntityType::Tool)
            .unwrap()
            .to_mapping();
        let mut live = target.clone();
        live["properties"]["x_custom"] = json!({"type": "keyword"});
        assert!(mapping_covers(&live, &target));
    }

    #[test]
    fn test_mapping_covers_detects_changes() {
        let target = json!({"properties": {
            "name": {"type": "text"},
            "definition": {"type": "object", "properties": {"tlp": {"type": "keyword"}}}
        }});

        let missing = json!({"properties": {"name": {"type": "text"}}});
        assert!(!mapping_covers(&missing, &target));

        let retyped = json!({"properties": {
            "name": {"type": "keyword"},
            "definition": {"properties": {"tlp": {"type": "keyword"}}}
        }});
        assert!(!mapping_covers(&retyped, &target));

        // Live object fields carry no explicit type.
        let implicit = json!({"properties": {
            "name": {"type": "text"},
            "definition": {"properties": {"tlp": {"type": "keyword"}}}
        }});
        assert!(mapping_covers(&implicit, &target));
    }
}
