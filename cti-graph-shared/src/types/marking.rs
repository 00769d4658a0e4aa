//! Well-known marking definitions and distribution-marking derivation.
//!
//! The four TLP markings use their published identifiers. PII and the
//! open-source licence marking, plus the open-markings grouping, use
//! deterministic identifiers so that every deployment agrees on them.

use serde_json::{json, Value};

use crate::types::entity::Entity;
use crate::types::entity_type::EntityType;
use crate::types::stix_id::StixId;

pub const TLP_WHITE: &str = "marking-definition--613f2e26-407d-48c7-9eca-b8e91df99dc9";
pub const TLP_GREEN: &str = "marking-definition--34098fce-860f-48ae-8e50-ebd3cc5e41da";
pub const TLP_AMBER: &str = "marking-definition--f88d31f6-486f-44da-b317-01333bde0b82";
pub const TLP_RED: &str = "marking-definition--5e57c739-391a-4eb3-b6be-7d15ca92d5ed";

/// `definition_type` of distribution-list markings.
pub const DISTRIBUTION_DEFINITION_TYPE: &str = "tlp-plus";

/// `context` of the grouping that lists open markings.
pub const OPEN_MARKINGS_CONTEXT: &str = "os-data-markings";

const PII_SEED: &str = "pii-marking";
const LICENCE_SEED: &str = "os-licence-marking";

/// Traffic-light protocol levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tlp {
    White,
    Green,
    Amber,
    Red,
}

impl Tlp {
    pub const ALL: [Tlp; 4] = [Tlp::White, Tlp::Green, Tlp::Amber, Tlp::Red];

    pub fn name(&self) -> &'static str {
        match self {
            Tlp::White => "white",
            Tlp::Green => "green",
            Tlp::Amber => "amber",
            Tlp::Red => "red",
        }
    }

    pub fn id(&self) -> StixId {
        let raw = match self {
            Tlp::White => TLP_WHITE,
            Tlp::Green => TLP_GREEN,
            Tlp::Amber => TLP_AMBER,
            Tlp::Red => TLP_RED,
        };
        StixId::parse(raw).unwrap_or_else(|_| StixId::deterministic(EntityType::MarkingDefinition, raw))
    }

    /// Resolve a marking id to a TLP level.
    pub fn from_id(id: &StixId) -> Option<Tlp> {
        Tlp::ALL.into_iter().find(|t| t.id() == *id)
    }

    /// Only AMBER and RED may serve as the base of a distribution marking.
    pub fn allows_distribution(&self) -> bool {
        matches!(self, Tlp::Amber | Tlp::Red)
    }

    /// The TLP marking definition entity.
    pub fn definition(&self) -> Entity {
        Entity::with_id(self.id(), EntityType::MarkingDefinition)
            .with_property("name", format!("TLP:{}", self.name().to_uppercase()))
            .with_property("definition_type", "tlp")
            .with_property("definition", json!({ "tlp": self.name() }))
    }
}

/// Identifier of the PII marking.
pub fn pii_marking_id() -> StixId {
    StixId::deterministic(EntityType::MarkingDefinition, PII_SEED)
}

/// Identifier of the open-source licence marking.
pub fn licence_marking_id() -> StixId {
    StixId::deterministic(EntityType::MarkingDefinition, LICENCE_SEED)
}

/// Identifier of the open-markings grouping owned by `system_identity`.
pub fn open_markings_group_id(system_identity: &StixId) -> StixId {
    StixId::deterministic(
        EntityType::Grouping,
        &format!("{}:{}", OPEN_MARKINGS_CONTEXT, system_identity),
    )
}

/// Derive the identifier of a distribution marking.
///
/// The seed is the sorted, de-duplicated set of the distribution refs, the
/// TLP base and the marking name, so the same inputs always produce the same
/// marking regardless of the order the refs were given in.
pub fn distribution_marking_id(name: &str, base: Tlp, distribution_refs: &[StixId]) -> StixId {
    let mut seed: Vec<String> = distribution_refs.iter().map(|r| r.to_string()).collect();
    seed.push(base.id().to_string());
    seed.push(name.to_string());
    seed.sort();
    seed.dedup();
    StixId::deterministic(EntityType::MarkingDefinition, &seed.join(","))
}

/// Build a distribution marking definition.
pub fn distribution_marking(
    author: &StixId,
    name: &str,
    base: Tlp,
    distribution_refs: &[StixId],
) -> Entity {
    let refs: Vec<Value> = distribution_refs
        .iter()
        .map(|r| Value::from(r.as_str()))
        .collect();
    Entity::with_id(
        distribution_marking_id(name, base, distribution_refs),
        EntityType::MarkingDefinition,
    )
    .with_author(author)
    .with_property("name", name)
    .with_property("definition_type", DISTRIBUTION_DEFINITION_TYPE)
    .with_property(
        "definition",
        json!({
            "tlp_marking_def_ref": base.id().as_str(),
            "distribution_refs": refs,
        }),
    )
}

/// The PII marking definition.
pub fn pii_marking(author: &StixId) -> Entity {
    Entity::with_id(pii_marking_id(), EntityType::MarkingDefinition)
        .with_author(author)
        .with_property("name", "PII")
        .with_property("definition_type", "statement")
        .with_property(
            "definition",
            json!({ "statement": "Personally identifiable information" }),
        )
}

/// The open-source licence marking definition.
pub fn licence_marking(author: &StixId) -> Entity {
    Entity::with_id(licence_marking_id(), EntityType::MarkingDefinition)
        .with_author(author)
        .with_property("name", "Open source licence")
        .with_property("definition_type", "statement")
        .with_property(
            "definition",
            json!({ "statement": "Shared under an open-source data licence" }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StixId {
        StixId::parse(s).unwrap()
    }

    #[test]
    fn test_tlp_ids_round_trip() {
        for tlp in Tlp::ALL {
            assert_eq!(Tlp::from_id(&tlp.id()), Some(tlp));
            assert!(tlp.id().is_type(EntityType::MarkingDefinition));
        }
        assert_eq!(Tlp::from_id(&pii_marking_id()), None);
    }

    #[test]
    fn test_distribution_base() {
        assert!(Tlp::Amber.allows_distribution());
        assert!(Tlp::Red.allows_distribution());
        assert!(!Tlp::White.allows_distribution());
        assert!(!Tlp::Green.allows_distribution());
    }

    #[test]
    fn test_distribution_id_is_order_independent() {
        let a = id("identity--a");
        let b = id("identity--b");
        let first = distribution_marking_id("team", Tlp::Amber, &[a.clone(), b.clone()]);
        let second = distribution_marking_id("team", Tlp::Amber, &[b.clone(), a.clone(), a.clone()]);
        assert_eq!(first, second);

        assert_ne!(first, distribution_marking_id("team", Tlp::Red, &[a.clone(), b.clone()]));
        assert_ne!(first, distribution_marking_id("other", Tlp::Amber, &[a, b]));
    }

    #[test]
    fn test_distribution_marking_shape() {
        let author = id("identity--author");
        let refs = vec![id("identity--a")];
        let marking = distribution_marking(&author, "team", Tlp::Red, &refs);
        assert_eq!(marking.definition_type(), Some(DISTRIBUTION_DEFINITION_TYPE));
        assert_eq!(marking.distribution_refs(), refs);
        assert_eq!(marking.created_by_ref, Some(author));
        assert_eq!(marking.id, distribution_marking_id("team", Tlp::Red, &refs));
    }

    #[test]
    fn test_well_known_ids_are_stable() {
        assert_eq!(pii_marking_id(), pii_marking_id());
        assert_ne!(pii_marking_id(), licence_marking_id());
        let system = id("identity--system");
        assert!(open_markings_group_id(&system).is_type(EntityType::Grouping));
    }
}
