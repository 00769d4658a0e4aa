//! Named graph patterns.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::molecule::rule::MoleculeRule;
use cti_graph_repository::Query;
use cti_graph_shared::{Entity, EntityType};

/// A named graph pattern.
///
/// `core` rules are the structural slots every instance of the molecule must
/// fill; `ext` rules are optional decorations whose hits are reported but never
/// drive the walk.
#[derive(Debug, Clone)]
pub struct Molecule {
    name: String,
    core: Vec<MoleculeRule>,
    ext: Vec<MoleculeRule>,
    lookup: HashSet<(EntityType, String, EntityType)>,
}

/// Serialized form of a molecule body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MoleculeSpec {
    pub core: Vec<MoleculeRule>,
    #[serde(default)]
    pub ext: Vec<MoleculeRule>,
}

impl Molecule {
    pub fn new(name: impl Into<String>, core: Vec<MoleculeRule>, ext: Vec<MoleculeRule>) -> Self {
        let lookup = core
            .iter()
            .chain(ext.iter())
            .map(|r| (r.source_type, r.relationship_type.clone(), r.target_type))
            .collect();
        Self {
            name: name.into(),
            core,
            ext,
            lookup,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core(&self) -> &[MoleculeRule] {
        &self.core
    }

    pub fn ext(&self) -> &[MoleculeRule] {
        &self.ext
    }

    /// Every rule, core first.
    pub fn rules(&self) -> impl Iterator<Item = &MoleculeRule> {
        self.core.iter().chain(self.ext.iter())
    }

    /// Returns true when the relationship triple is part of this molecule.
    pub fn has_rule(&self, source: EntityType, relationship_type: &str, target: EntityType) -> bool {
        self.lookup
            .contains(&(source, relationship_type.to_string(), target))
    }

    /// Returns true when `entity` may appear in this molecule: a relationship
    /// must fit one of the rules, any other entity must be of a type some rule
    /// connects.
    pub fn admits(&self, entity: &Entity) -> bool {
        if entity.is_relationship() {
            let (Some(source), Some(kind), Some(target)) = (
                entity.source_ref().and_then(|s| s.entity_type()),
                entity.relationship_type(),
                entity.target_ref().and_then(|t| t.entity_type()),
            ) else {
                return false;
            };
            return self.has_rule(source, kind, target);
        }
        self.node_types().contains(&entity.entity_type)
    }

    /// Entity types the rules connect.
    pub fn node_types(&self) -> BTreeSet<EntityType> {
        self.rules()
            .flat_map(|r| [r.source_type, r.target_type])
            .collect()
    }

    /// Query restricting documents to those this molecule admits.
    pub fn schema_filter(&self) -> Query {
        let mut clauses: Vec<Query> = self.rules().map(MoleculeRule::query).collect();
        clauses.push(Query::terms(
            "type",
            self.node_types().into_iter().map(|t| t.as_str()),
        ));
        Query::any(clauses)
    }

    pub(crate) fn spec(&self) -> MoleculeSpec {
        MoleculeSpec {
            core: self.core.clone(),
            ext: self.ext.clone(),
        }
    }
}
