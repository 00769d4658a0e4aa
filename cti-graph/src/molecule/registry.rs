//! Registry of named molecules.

use std::collections::{BTreeMap, HashMap};

use crate::molecule::definition::{Molecule, MoleculeSpec};
use crate::molecule::rule::MoleculeRule;
use crate::SetupError;
use cti_graph_shared::EntityType;

/// Organisation chart: membership, plus the locations members sit in or
/// operate at.
pub const ORG: &str = "org";
/// Indicators, the attack phases they indicate and what those phases target.
pub const INCIDENT: &str = "incident";
/// The neighbourhood of a single attack phase.
pub const PHASE: &str = "phase";
/// Indicators raised from observed data.
pub const EVENT: &str = "event";

/// Named molecules loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct MoleculeRegistry {
    molecules: HashMap<String, Molecule>,
}

impl MoleculeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The molecules the client's example consumers and the visibility
    /// engine's organisation walk rely on.
    pub fn builtin() -> Self {
        use EntityType::*;
        let rule = MoleculeRule::new;

        let mut registry = Self::new();
        registry.insert(Molecule::new(
            ORG,
            vec![rule(Identity, "member_of", Identity)],
            vec![
                rule(Identity, "located_at", Location),
                rule(Identity, "operates_at", Location),
                rule(Identity, "incorporated_at", Location),
            ],
        ));
        registry.insert(Molecule::new(
            INCIDENT,
            vec![
                rule(Indicator, "indicates", AttackPattern),
                rule(AttackPattern, "phase-of", AttackPattern),
                rule(AttackPattern, "targets", Identity),
            ],
            vec![
                rule(AttackPattern, "uses", Tool),
                rule(AttackPattern, "uses", Malware),
            ],
        ));
        registry.insert(Molecule::new(
            PHASE,
            vec![rule(AttackPattern, "phase-of", AttackPattern)],
            vec![
                rule(Indicator, "indicates", AttackPattern),
                rule(AttackPattern, "uses", Tool),
                rule(AttackPattern, "uses", Malware),
            ],
        ));
        registry.insert(Molecule::new(
            EVENT,
            vec![rule(Indicator, "based-on", ObservedData)],
            vec![rule(Indicator, "indicates", AttackPattern)],
        ));
        registry
    }

    /// Load molecules from JSON of the form
    /// `{"name": {"core": [{"source_type", "relationship_type", "target_type"}], "ext": [...]}}`.
    ///
    /// Every molecule needs at least one core rule.
    pub fn from_json_str(raw: &str) -> Result<Self, SetupError> {
        let specs: BTreeMap<String, MoleculeSpec> = serde_json::from_str(raw)
            .map_err(|e| SetupError::config(format!("Malformed molecule definitions: {}", e)))?;
        let mut registry = Self::new();
        for (name, spec) in specs {
            if spec.core.is_empty() {
                return Err(SetupError::config(format!(
                    "Molecule {} has no core rules",
                    name
                )));
            }
            registry.insert(Molecule::new(name, spec.core, spec.ext));
        }
        Ok(registry)
    }

    /// Serialize the registry in the format [`MoleculeRegistry::from_json_str`] reads.
    pub fn to_json_string(&self) -> String {
        let specs: BTreeMap<&str, MoleculeSpec> = self
            .molecules
            .values()
            .map(|m| (m.name(), m.spec()))
            .collect();
        serde_json::to_string_pretty(&specs).unwrap_or_default()
    }

    /// Register a molecule, replacing any molecule of the same name.
    pub fn insert(&mut self, molecule: Molecule) {
        self.molecules.insert(molecule.name().to_string(), molecule);
    }

    pub fn get(&self, name: &str) -> Option<&Molecule> {
        self.molecules.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.molecules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
