//! The closed vocabulary of entity kinds stored in the graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Kind of an entity. Every entity type has its own backend index whose alias
/// is the type name (e.g. `attack-pattern`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    AttackPattern,
    Campaign,
    CourseOfAction,
    Grouping,
    Identity,
    Indicator,
    Infrastructure,
    IntrusionSet,
    Location,
    Malware,
    MalwareAnalysis,
    Note,
    ObservedData,
    Opinion,
    Report,
    ThreatActor,
    Tool,
    Vulnerability,
    Relationship,
    Sighting,
    MarkingDefinition,
    Ipv4Addr,
    Ipv6Addr,
    DomainName,
    Url,
    File,
    EmailAddr,
}

impl EntityType {
    /// Every supported entity type, in index-creation order.
    pub const ALL: [EntityType; 27] = [
        EntityType::AttackPattern,
        EntityType::Campaign,
        EntityType::CourseOfAction,
        EntityType::Grouping,
        EntityType::Identity,
        EntityType::Indicator,
        EntityType::Infrastructure,
        EntityType::IntrusionSet,
        EntityType::Location,
        EntityType::Malware,
        EntityType::MalwareAnalysis,
        EntityType::Note,
        EntityType::ObservedData,
        EntityType::Opinion,
        EntityType::Report,
        EntityType::ThreatActor,
        EntityType::Tool,
        EntityType::Vulnerability,
        EntityType::Relationship,
        EntityType::Sighting,
        EntityType::MarkingDefinition,
        EntityType::Ipv4Addr,
        EntityType::Ipv6Addr,
        EntityType::DomainName,
        EntityType::Url,
        EntityType::File,
        EntityType::EmailAddr,
    ];

    /// Returns the type name as used in identifiers and index aliases.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::AttackPattern => "attack-pattern",
            EntityType::Campaign => "campaign",
            EntityType::CourseOfAction => "course-of-action",
            EntityType::Grouping => "grouping",
            EntityType::Identity => "identity",
            EntityType::Indicator => "indicator",
            EntityType::Infrastructure => "infrastructure",
            EntityType::IntrusionSet => "intrusion-set",
            EntityType::Location => "location",
            EntityType::Malware => "malware",
            EntityType::MalwareAnalysis => "malware-analysis",
            EntityType::Note => "note",
            EntityType::ObservedData => "observed-data",
            EntityType::Opinion => "opinion",
            EntityType::Report => "report",
            EntityType::ThreatActor => "threat-actor",
            EntityType::Tool => "tool",
            EntityType::Vulnerability => "vulnerability",
            EntityType::Relationship => "relationship",
            EntityType::Sighting => "sighting",
            EntityType::MarkingDefinition => "marking-definition",
            EntityType::Ipv4Addr => "ipv4-addr",
            EntityType::Ipv6Addr => "ipv6-addr",
            EntityType::DomainName => "domain-name",
            EntityType::Url => "url",
            EntityType::File => "file",
            EntityType::EmailAddr => "email-addr",
        }
    }

    /// Returns true for domain objects, which also sit behind the `sdo`
    /// umbrella alias.
    pub fn is_domain_object(&self) -> bool {
        !matches!(
            self,
            EntityType::Relationship
                | EntityType::Sighting
                | EntityType::MarkingDefinition
                | EntityType::Ipv4Addr
                | EntityType::Ipv6Addr
                | EntityType::DomainName
                | EntityType::Url
                | EntityType::File
                | EntityType::EmailAddr
        )
    }

    /// Returns true for edge entities.
    pub fn is_relationship(&self) -> bool {
        matches!(self, EntityType::Relationship | EntityType::Sighting)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ModelError::UnknownType(s.to_string()))
    }
}
