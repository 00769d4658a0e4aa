//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use cti_graph::config::EngineConfig;
use cti_graph::mapping::PropertySchemas;
use cti_graph::molecule::MoleculeRegistry;
use cti_graph::IntelClient;
use cti_graph_repository::InMemoryBackend;
use cti_graph_shared::{Entity, EntityType, StixId};

/// A client over a fresh in-memory backend with mappings and core data set up.
pub async fn client() -> (IntelClient, Arc<InMemoryBackend>) {
    client_with(EngineConfig::default()).await
}

pub async fn client_with(config: EngineConfig) -> (IntelClient, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let client = IntelClient::new(
        backend.clone(),
        Arc::new(MoleculeRegistry::builtin()),
        config,
    );
    let report = client.setup(&PropertySchemas::builtin()).await.unwrap();
    assert!(report.is_clean());
    (client, backend)
}

pub fn individual(name: &str) -> Entity {
    Entity::new(EntityType::Identity)
        .with_property("name", name)
        .with_property("identity_class", "individual")
}

pub fn organisation(name: &str) -> Entity {
    Entity::new(EntityType::Identity)
        .with_property("name", name)
        .with_property("identity_class", "organization")
}

pub fn member_of(member: &StixId, organisation: &StixId) -> Entity {
    Entity::relationship(member, "member_of", organisation)
}

pub fn tool(name: &str) -> Entity {
    Entity::new(EntityType::Tool).with_property("name", name)
}

pub fn ids(entities: &[Entity]) -> Vec<StixId> {
    let mut ids: Vec<StixId> = entities.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids
}

/// An incident: an indicator of the incident's attack pattern, a phase of it,
/// and the organisation it targets.
pub struct IncidentFixture {
    pub indicator: Entity,
    pub incident: Entity,
    pub phase: Entity,
    pub target: Entity,
    pub indicates: Entity,
    pub phase_of: Entity,
    pub targets: Entity,
}

impl IncidentFixture {
    pub fn new(assignee: &StixId, target: Entity) -> Self {
        let indicator = Entity::new(EntityType::Indicator)
            .with_property("name", "bad.example.com")
            .with_property("pattern", "[domain-name:value = 'bad.example.com']");
        let incident = Entity::new(EntityType::AttackPattern)
            .with_property("name", "Phishing campaign")
            .with_property("x_assigned_to_ref", assignee.as_str());
        let phase = Entity::new(EntityType::AttackPattern).with_property("name", "Initial access");
        let indicates = Entity::relationship(&indicator.id, "indicates", &incident.id);
        let phase_of = Entity::relationship(&phase.id, "phase-of", &incident.id);
        let targets = Entity::relationship(&incident.id, "targets", &target.id);
        Self {
            indicator,
            incident,
            phase,
            target,
            indicates,
            phase_of,
            targets,
        }
    }

    pub fn entities(&self) -> Vec<Entity> {
        vec![
            self.indicator.clone(),
            self.incident.clone(),
            self.phase.clone(),
            self.target.clone(),
            self.indicates.clone(),
            self.phase_of.clone(),
            self.targets.clone(),
        ]
    }
}
