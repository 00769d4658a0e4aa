//! Flat relationship rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use cti_graph_repository::Query;
use cti_graph_shared::{Entity, EntityType};

/// One structural slot of a molecule: a relationship of `relationship_type`
/// from an entity of `source_type` to an entity of `target_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoleculeRule {
    pub source_type: EntityType,
    pub relationship_type: String,
    pub target_type: EntityType,
}

impl MoleculeRule {
    pub fn new(
        source_type: EntityType,
        relationship_type: impl Into<String>,
        target_type: EntityType,
    ) -> Self {
        Self {
            source_type,
            relationship_type: relationship_type.into(),
            target_type,
        }
    }

    /// Query matching relationship documents that fit this rule.
    pub fn query(&self) -> Query {
        Query::all(vec![
            Query::term("type", EntityType::Relationship.as_str()),
            Query::term("relationship_type", self.relationship_type.as_str()),
            Query::ref_type("source_ref", self.source_type.as_str()),
            Query::ref_type("target_ref", self.target_type.as_str()),
        ])
    }

    /// Returns true when `entity` is a relationship fitting this rule.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.is_relationship()
            && entity.relationship_type() == Some(self.relationship_type.as_str())
            && entity
                .source_ref()
                .map(|s| s.is_type(self.source_type))
                .unwrap_or(false)
            && entity
                .target_ref()
                .map(|t| t.is_type(self.target_type))
                .unwrap_or(false)
    }
}

impl fmt::Display for MoleculeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -{}-> {}",
            self.source_type, self.relationship_type, self.target_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cti_graph_shared::StixId;

    fn id(s: &str) -> StixId {
        StixId::parse(s).unwrap()
    }

    #[test]
    fn test_rule_matches_entity_and_document() {
        let rule = MoleculeRule::new(EntityType::Indicator, "indicates", EntityType::AttackPattern);
        let rel = Entity::relationship(&id("indicator--1"), "indicates", &id("attack-pattern--2"));
        assert!(rule.matches(&rel));
        assert!(rule.query().matches(&rel.to_value()));

        let wrong_target = Entity::relationship(&id("indicator--1"), "indicates", &id("malware--2"));
        assert!(!rule.matches(&wrong_target));
        assert!(!rule.query().matches(&wrong_target.to_value()));

        let wrong_kind = Entity::relationship(&id("indicator--1"), "based-on", &id("attack-pattern--2"));
        assert!(!rule.matches(&wrong_kind));
    }

    #[test]
    fn test_display() {
        let rule = MoleculeRule::new(EntityType::Identity, "member_of", EntityType::Identity);
        assert_eq!(rule.to_string(), "identity -member_of-> identity");
    }
}
