//! Core data every deployment starts with.
//!
//! The system identity authors the well-known marking definitions and the
//! open-markings grouping. It belongs to the system organisation, so its own
//! organisation chart is never empty. Every id here is deterministic: storing
//! core data twice leaves the store unchanged.

use tracing::info;

use crate::store::{EntityStore, IndexOutcome};
use cti_graph_repository::BackendError;
use cti_graph_shared::marking::{
    licence_marking, licence_marking_id, open_markings_group_id, pii_marking, pii_marking_id, Tlp,
    OPEN_MARKINGS_CONTEXT,
};
use cti_graph_shared::{Entity, EntityType, StixId};

const SYSTEM_IDENTITY_SEED: &str = "cti-graph:system";
const SYSTEM_ORG_SEED: &str = "cti-graph:system-organisation";

/// Id of the system identity.
pub fn system_identity_id() -> StixId {
    StixId::deterministic(EntityType::Identity, SYSTEM_IDENTITY_SEED)
}

/// Id of the organisation the system identity belongs to.
pub fn system_org_id() -> StixId {
    StixId::deterministic(EntityType::Identity, SYSTEM_ORG_SEED)
}

/// Markings visible to every caller from the start.
pub fn default_open_markings() -> Vec<StixId> {
    vec![Tlp::White.id(), Tlp::Green.id(), licence_marking_id()]
}

/// The system identity and the entities it owns.
#[derive(Debug, Clone)]
pub struct SystemContext {
    identity: StixId,
    organisation: StixId,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemContext {
    pub fn new() -> Self {
        Self {
            identity: system_identity_id(),
            organisation: system_org_id(),
        }
    }

    pub fn identity(&self) -> &StixId {
        &self.identity
    }

    pub fn organisation(&self) -> &StixId {
        &self.organisation
    }

    /// Every core entity, identities first so references resolve in order.
    pub fn core_entities(&self) -> Vec<Entity> {
        let pii = [pii_marking_id()];

        let identity = Entity::with_id(self.identity.clone(), EntityType::Identity)
            .with_author(&self.identity)
            .with_markings(&pii)
            .with_property("name", "cti-graph")
            .with_property("identity_class", "system");
        let organisation = Entity::with_id(self.organisation.clone(), EntityType::Identity)
            .with_author(&self.identity)
            .with_markings(&pii)
            .with_property("name", "cti-graph operators")
            .with_property("identity_class", "organization");
        let membership = Entity::with_id(
            StixId::deterministic(
                EntityType::Relationship,
                &format!("member_of:{}:{}", self.identity, self.organisation),
            ),
            EntityType::Relationship,
        )
        .with_author(&self.identity)
        .with_markings(&pii)
        .with_property("relationship_type", "member_of")
        .with_property("source_ref", self.identity.as_str())
        .with_property("target_ref", self.organisation.as_str());

        let mut entities = vec![identity, organisation, membership];
        entities.extend(
            Tlp::ALL
                .into_iter()
                .map(|tlp| tlp.definition().with_author(&self.identity)),
        );
        entities.push(pii_marking(&self.identity));
        entities.push(licence_marking(&self.identity));

        let mut open_markings = Entity::grouping(OPEN_MARKINGS_CONTEXT, &default_open_markings())
            .with_author(&self.identity)
            .with_property("name", "Open markings");
        open_markings.id = open_markings_group_id(&self.identity);
        entities.push(open_markings);

        entities
    }

    /// Store the core entities. Entities already present are left untouched.
    pub async fn store_core_data(&self, store: &EntityStore) -> Result<Vec<IndexOutcome>, BackendError> {
        let outcomes = store
            .index_entities(&self.identity, &self.core_entities(), false, true)
            .await?;
        let created = outcomes
            .iter()
            .filter(|o| matches!(o, IndexOutcome::Created(_)))
            .count();
        info!(created, total = outcomes.len(), "Core data stored");
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use cti_graph_repository::InMemoryBackend;
    use std::sync::Arc;

    #[test]
    fn test_core_entities_are_deterministic() {
        let first: Vec<StixId> = SystemContext::new()
            .core_entities()
            .into_iter()
            .map(|e| e.id)
            .collect();
        let second: Vec<StixId> = SystemContext::new()
            .core_entities()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn test_core_entities_are_valid() {
        let context = SystemContext::new();
        for entity in context.core_entities() {
            entity.validate().unwrap();
        }
        let grouping = context
            .core_entities()
            .into_iter()
            .find(|e| e.entity_type == EntityType::Grouping)
            .unwrap();
        assert_eq!(grouping.object_refs(), default_open_markings());
        assert_eq!(grouping.created_by_ref.as_ref(), Some(context.identity()));
    }

    #[tokio::test]
    async fn test_store_core_data_is_idempotent() {
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()), EngineConfig::default());
        let context = SystemContext::new();

        let first = context.store_core_data(&store).await.unwrap();
        assert!(first.iter().all(|o| matches!(o, IndexOutcome::Created(_))));

        let second = context.store_core_data(&store).await.unwrap();
        assert!(second.iter().all(|o| matches!(o, IndexOutcome::Skipped(_))));
        assert!(store.exists(&system_org_id()).await.unwrap());
    }
}
