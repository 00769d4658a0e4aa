//! Entity records.
//!
//! An entity is a typed, versioned record: nodes (indicators, identities, …),
//! relationship edges, groupings and marking definitions all share this shape.
//! Fields beyond the common envelope are kept as free-form JSON properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;
use crate::types::entity_type::EntityType;
use crate::types::stix_id::StixId;

/// Suffixes that mark a property as a reference to other entities.
const REF_SUFFIX: &str = "_ref";
const REFS_SUFFIX: &str = "_refs";

/// A typed graph entity.
///
/// # Invariant
///
/// The type prefix of `id` always matches `entity_type`. Deserialization and
/// [`Entity::from_value`] enforce this; constructors uphold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EntityRecord", into = "EntityRecord")]
pub struct Entity {
    pub id: StixId,
    pub entity_type: EntityType,
    pub created_by_ref: Option<StixId>,
    pub object_marking_refs: Vec<StixId>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub revoked: bool,
    /// Type-specific fields (`name`, `source_ref`, `object_refs`, …).
    pub properties: Map<String, Value>,
}

/// Wire shape of an entity, before the id/type invariant is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityRecord {
    id: StixId,
    #[serde(rename = "type")]
    entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by_ref: Option<StixId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    object_marking_refs: Vec<StixId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    revoked: bool,
    #[serde(flatten)]
    properties: Map<String, Value>,
}

impl TryFrom<EntityRecord> for Entity {
    type Error = ModelError;

    fn try_from(record: EntityRecord) -> Result<Self, Self::Error> {
        if !record.id.is_type(record.entity_type) {
            return Err(ModelError::TypeMismatch {
                id: record.id.to_string(),
                entity_type: record.entity_type.to_string(),
            });
        }
        Ok(Self {
            id: record.id,
            entity_type: record.entity_type,
            created_by_ref: record.created_by_ref,
            object_marking_refs: record.object_marking_refs,
            created: record.created,
            modified: record.modified,
            revoked: record.revoked,
            properties: record.properties,
        })
    }
}

impl From<Entity> for EntityRecord {
    fn from(entity: Entity) -> Self {
        Self {
            id: entity.id,
            entity_type: entity.entity_type,
            created_by_ref: entity.created_by_ref,
            object_marking_refs: entity.object_marking_refs,
            created: entity.created,
            modified: entity.modified,
            revoked: entity.revoked,
            properties: entity.properties,
        }
    }
}

impl Entity {
    /// Create a new entity of the given type with a fresh identifier.
    pub fn new(entity_type: EntityType) -> Self {
        Self::with_id(StixId::generate(entity_type), entity_type)
    }

    /// Create an entity with a caller-chosen identifier.
    ///
    /// The identifier must carry the prefix of `entity_type`; callers that
    /// cannot guarantee this should go through [`Entity::from_value`].
    pub fn with_id(id: StixId, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type,
            created_by_ref: None,
            object_marking_refs: Vec::new(),
            created: Some(now),
            modified: Some(now),
            revoked: false,
            properties: Map::new(),
        }
    }

    /// Create a relationship edge.
    pub fn relationship(source: &StixId, relationship_type: &str, target: &StixId) -> Self {
        Self::new(EntityType::Relationship)
            .with_property("relationship_type", relationship_type)
            .with_property("source_ref", source.as_str())
            .with_property("target_ref", target.as_str())
    }

    /// Create a grouping bundling the given members.
    pub fn grouping(context: &str, object_refs: &[StixId]) -> Self {
        let refs: Vec<Value> = object_refs.iter().map(|r| Value::from(r.as_str())).collect();
        Self::new(EntityType::Grouping)
            .with_property("context", context)
            .with_property("object_refs", Value::Array(refs))
    }

    /// Decode an entity from a JSON document, checking the id/type invariant.
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        serde_json::from_value(value).map_err(|e| ModelError::malformed(e.to_string()))
    }

    /// Encode the entity as a JSON document.
    pub fn to_value(&self) -> Value {
        // The record shape only contains strings, timestamps and JSON values.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn with_author(mut self, author: &StixId) -> Self {
        self.created_by_ref = Some(author.clone());
        self
    }

    pub fn with_markings(mut self, markings: &[StixId]) -> Self {
        self.object_marking_refs = markings.to_vec();
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Read a string property.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Read a single-reference property.
    pub fn get_ref(&self, key: &str) -> Option<StixId> {
        self.get_str(key).and_then(|s| StixId::parse(s).ok())
    }

    /// Read a list-of-references property. Malformed entries are skipped.
    pub fn get_refs(&self, key: &str) -> Vec<StixId> {
        match self.properties.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| StixId::parse(s).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every id referenced through a `*_ref` / `*_refs` property. Authorship
    /// and markings are envelope fields and are not included.
    pub fn references(&self) -> Vec<StixId> {
        let mut refs = Vec::new();
        for (key, value) in &self.properties {
            if key.ends_with(REF_SUFFIX) {
                if let Some(id) = value.as_str().and_then(|s| StixId::parse(s).ok()) {
                    refs.push(id);
                }
            } else if key.ends_with(REFS_SUFFIX) {
                refs.extend(self.get_refs(key));
            }
        }
        refs
    }

    pub fn is_relationship(&self) -> bool {
        self.entity_type == EntityType::Relationship
    }

    pub fn relationship_type(&self) -> Option<&str> {
        self.get_str("relationship_type")
    }

    pub fn source_ref(&self) -> Option<StixId> {
        self.get_ref("source_ref")
    }

    pub fn target_ref(&self) -> Option<StixId> {
        self.get_ref("target_ref")
    }

    /// Members declared by a grouping.
    pub fn object_refs(&self) -> Vec<StixId> {
        self.get_refs("object_refs")
    }

    /// `identity_class` of an identity (`individual`, `organization`, `system`).
    pub fn identity_class(&self) -> Option<&str> {
        self.get_str("identity_class")
    }

    /// `definition_type` of a marking definition.
    pub fn definition_type(&self) -> Option<&str> {
        self.get_str("definition_type")
    }

    /// Identities authorised by a distribution-list marking.
    pub fn distribution_refs(&self) -> Vec<StixId> {
        self.properties
            .get("definition")
            .and_then(|d| d.get("distribution_refs"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| StixId::parse(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check the type-specific required fields.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.id.is_type(self.entity_type) {
            return Err(ModelError::TypeMismatch {
                id: self.id.to_string(),
                entity_type: self.entity_type.to_string(),
            });
        }
        if self.is_relationship() {
            for field in ["source_ref", "target_ref"] {
                if self.get_ref(field).is_none() {
                    return Err(ModelError::missing_field(self.id.as_str(), field));
                }
            }
            if self.relationship_type().is_none() {
                return Err(ModelError::missing_field(
                    self.id.as_str(),
                    "relationship_type",
                ));
            }
        }
        Ok(())
    }

    /// Derive the next version of this entity: same content and logical
    /// identity, fresh identifier and timestamps. The caller is responsible for
    /// revoking the previous instance and re-pointing relationships.
    pub fn next_version(&self) -> Self {
        let now = Utc::now();
        let mut next = self.clone();
        next.id = StixId::generate(self.entity_type);
        next.created = Some(now);
        next.modified = Some(now);
        next.revoked = false;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> StixId {
        StixId::parse(s).unwrap()
    }

    #[test]
    fn test_round_trip_keeps_free_form_fields() {
        let value = json!({
            "id": "indicator--1",
            "type": "indicator",
            "created_by_ref": "identity--a",
            "object_marking_refs": ["marking-definition--m"],
            "name": "bad ip",
            "pattern": "[ipv4-addr:value = '8.8.8.8']"
        });
        let entity = Entity::from_value(value.clone()).unwrap();
        assert_eq!(entity.entity_type, EntityType::Indicator);
        assert_eq!(entity.created_by_ref, Some(id("identity--a")));
        assert_eq!(entity.get_str("name"), Some("bad ip"));
        assert_eq!(entity.to_value(), value);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let value = json!({"id": "tool--1", "type": "malware"});
        assert!(Entity::from_value(value).is_err());
    }

    #[test]
    fn test_relationship_accessors() {
        let source = id("indicator--1");
        let target = id("attack-pattern--2");
        let rel = Entity::relationship(&source, "indicates", &target);
        assert!(rel.is_relationship());
        assert_eq!(rel.relationship_type(), Some("indicates"));
        assert_eq!(rel.source_ref(), Some(source.clone()));
        assert_eq!(rel.target_ref(), Some(target.clone()));
        assert!(rel.validate().is_ok());

        let refs = rel.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&source));
        assert!(refs.contains(&target));
    }

    #[test]
    fn test_relationship_missing_target_fails_validation() {
        let mut rel = Entity::relationship(&id("indicator--1"), "indicates", &id("tool--2"));
        rel.properties.remove("target_ref");
        assert!(matches!(
            rel.validate(),
            Err(ModelError::MissingField { .. })
        ));
    }

    #[test]
    fn test_references_skip_envelope_fields() {
        let entity = Entity::new(EntityType::ObservedData)
            .with_author(&id("identity--a"))
            .with_markings(&[id("marking-definition--m")])
            .with_property("object_refs", json!(["ipv4-addr--1", "domain-name--2"]))
            .with_property("sample_ref", "file--3");
        let refs = entity.references();
        assert_eq!(refs.len(), 3);
        assert!(!refs.contains(&id("identity--a")));
        assert!(!refs.contains(&id("marking-definition--m")));
    }

    #[test]
    fn test_grouping_object_refs() {
        let members = vec![id("indicator--1"), id("relationship--2")];
        let grouping = Entity::grouping("commit", &members);
        assert_eq!(grouping.object_refs(), members);
        assert_eq!(grouping.get_str("context"), Some("commit"));
    }

    #[test]
    fn test_distribution_refs() {
        let marking = Entity::new(EntityType::MarkingDefinition).with_property(
            "definition",
            json!({"distribution_refs": ["identity--a", "identity--b"]}),
        );
        assert_eq!(
            marking.distribution_refs(),
            vec![id("identity--a"), id("identity--b")]
        );
    }

    #[test]
    fn test_next_version() {
        let original = Entity::new(EntityType::Tool).with_property("name", "nmap");
        let next = original.next_version();
        assert_ne!(next.id, original.id);
        assert!(next.id.is_type(EntityType::Tool));
        assert_eq!(next.get_str("name"), Some("nmap"));
        assert!(!next.revoked);
    }

    #[test]
    fn test_revoked_not_serialized_when_false() {
        let entity = Entity::new(EntityType::Tool);
        assert!(entity.to_value().get("revoked").is_none());
        let mut revoked = entity.clone();
        revoked.revoked = true;
        assert_eq!(revoked.to_value()["revoked"], json!(true));
    }
}
