//! Entity-type property schemas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SetupError;
use cti_graph_shared::EntityType;

/// Kind of a property, independent of any backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Boolean,
    Integer,
    Float,
    Timestamp,
    /// Exact-match identifier (hashes, ids of external systems).
    Identifier,
    /// Short string matched exactly.
    String,
    /// Value from an open or closed vocabulary.
    Taxonomy,
    /// Free text, analyzed.
    Text,
    /// Single reference to another entity.
    Reference,
    /// List of references to other entities.
    ReferenceList,
    /// List of composite values queried element by element.
    Nested(BTreeMap<String, PropertyKind>),
    /// Composite value queried by path.
    Dictionary(BTreeMap<String, PropertyKind>),
    Binary,
}

/// Property kinds of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySchema {
    properties: BTreeMap<String, PropertyKind>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.insert(name.to_string(), kind);
        self
    }

    pub fn insert(&mut self, name: &str, kind: PropertyKind) {
        self.properties.insert(name.to_string(), kind);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyKind> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyKind> {
        &self.properties
    }

    /// Add every property of `other` this schema does not define yet.
    fn merge_missing(&mut self, other: &PropertySchema) {
        for (name, kind) in &other.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| kind.clone());
        }
    }
}

/// Property schemas of every synchronized entity type.
#[derive(Debug, Clone, Default)]
pub struct PropertySchemas {
    types: BTreeMap<EntityType, PropertySchema>,
}

impl PropertySchemas {
    /// Schemas for every supported entity type.
    pub fn builtin() -> Self {
        let common = common_properties();
        let types = EntityType::ALL
            .into_iter()
            .map(|entity_type| {
                let mut schema = type_properties(entity_type);
                schema.merge_missing(&common);
                (entity_type, schema)
            })
            .collect();
        Self { types }
    }

    /// Load schemas from JSON of the form `{"indicator": {"pattern": "text", ...}}`.
    /// Only the listed types are synchronized; the envelope properties shared
    /// by every entity are added to each.
    pub fn from_json_str(raw: &str) -> Result<Self, SetupError> {
        let parsed: BTreeMap<EntityType, PropertySchema> = serde_json::from_str(raw)
            .map_err(|e| SetupError::config(format!("Malformed property schemas: {}", e)))?;
        let common = common_properties();
        let types = parsed
            .into_iter()
            .map(|(entity_type, mut schema)| {
                schema.merge_missing(&common);
                (entity_type, schema)
            })
            .collect();
        Ok(Self { types })
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&PropertySchema> {
        self.types.get(&entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &PropertySchema)> {
        self.types.iter().map(|(t, s)| (*t, s))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn map(entries: &[(&str, PropertyKind)]) -> BTreeMap<String, PropertyKind> {
    entries
        .iter()
        .map(|(name, kind)| (name.to_string(), kind.clone()))
        .collect()
}

fn kill_chain_phases() -> PropertyKind {
    PropertyKind::Nested(map(&[
        ("kill_chain_name", PropertyKind::Taxonomy),
        ("phase_name", PropertyKind::Taxonomy),
    ]))
}

/// Envelope properties every entity carries.
fn common_properties() -> PropertySchema {
    use PropertyKind::*;
    PropertySchema::new()
        .with("id", Identifier)
        .with("type", Taxonomy)
        .with("spec_version", Taxonomy)
        .with("created", Timestamp)
        .with("modified", Timestamp)
        .with("created_by_ref", Reference)
        .with("object_marking_refs", ReferenceList)
        .with("revoked", Boolean)
        .with("labels", Taxonomy)
        .with("confidence", Integer)
        .with("lang", Taxonomy)
        .with(
            "external_references",
            Nested(map(&[
                ("source_name", Text),
                ("description", Text),
                ("url", Identifier),
                ("external_id", Identifier),
            ])),
        )
        .with(
            "granular_markings",
            Nested(map(&[("marking_ref", Reference), ("selectors", Taxonomy)])),
        )
}

/// Properties specific to one entity type.
fn type_properties(entity_type: EntityType) -> PropertySchema {
    use PropertyKind::*;
    let named = PropertySchema::new()
        .with("name", Text)
        .with("description", Text);

    match entity_type {
        EntityType::AttackPattern => named
            .with("aliases", Text)
            .with("kill_chain_phases", kill_chain_phases()),
        EntityType::Campaign => named
            .with("aliases", Text)
            .with("first_seen", Timestamp)
            .with("last_seen", Timestamp)
            .with("objective", Text),
        EntityType::CourseOfAction => named,
        EntityType::Grouping => named
            .with("context", Taxonomy)
            .with("object_refs", ReferenceList),
        EntityType::Identity => named
            .with("identity_class", Taxonomy)
            .with("sectors", Taxonomy)
            .with("roles", Taxonomy)
            .with("contact_information", Text),
        EntityType::Indicator => named
            .with("indicator_types", Taxonomy)
            .with("pattern", Text)
            .with("pattern_type", Taxonomy)
            .with("valid_from", Timestamp)
            .with("valid_until", Timestamp)
            .with("kill_chain_phases", kill_chain_phases()),
        EntityType::Infrastructure => named
            .with("infrastructure_types", Taxonomy)
            .with("first_seen", Timestamp)
            .with("last_seen", Timestamp)
            .with("kill_chain_phases", kill_chain_phases()),
        EntityType::IntrusionSet => named
            .with("aliases", Text)
            .with("goals", Text)
            .with("resource_level", Taxonomy)
            .with("primary_motivation", Taxonomy)
            .with("secondary_motivations", Taxonomy)
            .with("first_seen", Timestamp)
            .with("last_seen", Timestamp),
        EntityType::Location => named
            .with("region", Taxonomy)
            .with("country", Taxonomy)
            .with("administrative_area", Text)
            .with("city", Text)
            .with("street_address", Text)
            .with("postal_code", Text)
            .with("latitude", Float)
            .with("longitude", Float),
        EntityType::Malware => named
            .with("malware_types", Taxonomy)
            .with("is_family", Boolean)
            .with("aliases", Text)
            .with("kill_chain_phases", kill_chain_phases())
            .with("sample_refs", ReferenceList),
        EntityType::MalwareAnalysis => PropertySchema::new()
            .with("product", Identifier)
            .with("result", Taxonomy)
            .with("sample_ref", Reference)
            .with("analysis_sco_refs", ReferenceList),
        EntityType::Note => PropertySchema::new()
            .with("abstract", Text)
            .with("content", Text)
            .with("authors", Text)
            .with("object_refs", ReferenceList),
        EntityType::ObservedData => PropertySchema::new()
            .with("first_observed", Timestamp)
            .with("last_observed", Timestamp)
            .with("number_observed", Integer)
            .with("object_refs", ReferenceList),
        EntityType::Opinion => PropertySchema::new()
            .with("explanation", Text)
            .with("authors", Text)
            .with("opinion", Taxonomy)
            .with("object_refs", ReferenceList),
        EntityType::Report => named
            .with("report_types", Taxonomy)
            .with("published", Timestamp)
            .with("object_refs", ReferenceList),
        EntityType::ThreatActor => named
            .with("threat_actor_types", Taxonomy)
            .with("aliases", Text)
            .with("sophistication", Taxonomy)
            .with("resource_level", Taxonomy)
            .with("primary_motivation", Taxonomy)
            .with("goals", Text),
        EntityType::Tool => named
            .with("tool_types", Taxonomy)
            .with("tool_version", Text)
            .with("kill_chain_phases", kill_chain_phases()),
        EntityType::Vulnerability => named,
        EntityType::Relationship => PropertySchema::new()
            .with("relationship_type", Taxonomy)
            .with("description", Text)
            .with("source_ref", Reference)
            .with("target_ref", Reference)
            .with("start_time", Timestamp)
            .with("stop_time", Timestamp),
        EntityType::Sighting => PropertySchema::new()
            .with("description", Text)
            .with("first_seen", Timestamp)
            .with("last_seen", Timestamp)
            .with("count", Integer)
            .with("sighting_of_ref", Reference)
            .with("observed_data_refs", ReferenceList)
            .with("where_sighted_refs", ReferenceList),
        EntityType::MarkingDefinition => PropertySchema::new()
            .with("name", Text)
            .with("definition_type", Taxonomy)
            .with(
                "definition",
                Dictionary(map(&[
                    ("tlp", Taxonomy),
                    ("statement", Text),
                    ("tlp_marking_def_ref", Reference),
                    ("distribution_refs", ReferenceList),
                ])),
            ),
        EntityType::Ipv4Addr | EntityType::Ipv6Addr => PropertySchema::new()
            .with("value", Identifier)
            .with("resolves_to_refs", ReferenceList),
        EntityType::DomainName => PropertySchema::new()
            .with("value", Identifier)
            .with("resolves_to_refs", ReferenceList),
        EntityType::Url | EntityType::EmailAddr => PropertySchema::new().with("value", Identifier),
        EntityType::File => PropertySchema::new()
            .with("name", String)
            .with("size", Integer)
            .with("mime_type", Taxonomy)
            .with(
                "hashes",
                Dictionary(map(&[
                    ("MD5", Identifier),
                    ("SHA-1", Identifier),
                    ("SHA-256", Identifier),
                ])),
            ),
    }
}
