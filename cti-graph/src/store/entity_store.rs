//! Entity persistence with up-versioning.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use cti_graph_repository::{BackendError, DocumentRef, Query, SearchBackend};
use cti_graph_shared::{Entity, EntityType, StixId};

/// Relationship linking a new version to the instance it replaces.
pub const DERIVED_FROM: &str = "derived-from";

/// What a single write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The entity was stored for the first time.
    Created(StixId),
    /// The entity already existed; a new version was stored and the previous
    /// instance revoked.
    UpVersioned { previous: StixId, current: StixId },
    /// The entity already existed and up-versioning was not requested.
    Skipped(StixId),
}

impl IndexOutcome {
    /// The id now holding the entity's content.
    pub fn current(&self) -> &StixId {
        match self {
            IndexOutcome::Created(id) | IndexOutcome::Skipped(id) => id,
            IndexOutcome::UpVersioned { current, .. } => current,
        }
    }
}

/// Reads and writes entities in their per-type indices.
///
/// Every entity lives in the index aliased by its type name, under the key of
/// its identifier. Reads through this store bypass visibility views and are
/// meant for internal lookups only.
#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn SearchBackend>,
    config: EngineConfig,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn SearchBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Store an entity.
    ///
    /// A first write creates the document. A repeat write with `up_version`
    /// stores a fresh-id copy, links it to the old instance with a
    /// `derived-from` relationship authored by `caller`, and marks the old
    /// instance revoked. Concurrent up-versions of the same entity are not
    /// reconciled: each produces its own new version.
    ///
    /// # Arguments
    ///
    /// * `caller` - Identity performing the write
    /// * `entity` - The entity to store
    /// * `up_version` - Version the entity when it already exists
    /// * `refresh` - Make the write visible to search before returning
    #[instrument(skip(self, entity), fields(caller = %caller, entity_id = %entity.id))]
    pub async fn index_entity(
        &self,
        caller: &StixId,
        entity: &Entity,
        up_version: bool,
        refresh: bool,
    ) -> Result<IndexOutcome, BackendError> {
        entity
            .validate()
            .map_err(|e| BackendError::validation(e.to_string()))?;

        let index = entity.entity_type.as_str();
        if !self.backend.document_exists(index, entity.id.key()).await? {
            self.backend
                .index_document(index, entity.id.key(), &entity.to_value(), refresh)
                .await?;
            debug!(index = %index, "Entity created");
            return Ok(IndexOutcome::Created(entity.id.clone()));
        }

        if !up_version {
            debug!(index = %index, "Entity exists, skipping");
            return Ok(IndexOutcome::Skipped(entity.id.clone()));
        }

        let next = entity.next_version();
        self.backend
            .index_document(index, next.id.key(), &next.to_value(), refresh)
            .await?;

        let lineage = Entity::relationship(&next.id, DERIVED_FROM, &entity.id)
            .with_author(caller)
            .with_markings(&entity.object_marking_refs);
        let relationship_index = EntityType::Relationship.as_str();
        self.backend
            .index_document(
                relationship_index,
                lineage.id.key(),
                &lineage.to_value(),
                refresh,
            )
            .await?;

        self.backend
            .update_document(
                index,
                entity.id.key(),
                &serde_json::json!({ "revoked": true }),
                refresh,
            )
            .await?;

        debug!(index = %index, new_id = %next.id, "Entity up-versioned");
        Ok(IndexOutcome::UpVersioned {
            previous: entity.id.clone(),
            current: next.id,
        })
    }

    /// Store a batch of entities in order. `refresh` is honoured on the last
    /// write only.
    pub async fn index_entities(
        &self,
        caller: &StixId,
        entities: &[Entity],
        up_version: bool,
        refresh: bool,
    ) -> Result<Vec<IndexOutcome>, BackendError> {
        let mut outcomes = Vec::with_capacity(entities.len());
        let last = entities.len().saturating_sub(1);
        for (position, entity) in entities.iter().enumerate() {
            let outcome = self
                .index_entity(caller, entity, up_version, refresh && position == last)
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Check whether an entity is stored.
    pub async fn exists(&self, id: &StixId) -> Result<bool, BackendError> {
        self.backend
            .document_exists(id.type_prefix(), id.key())
            .await
    }

    /// Fetch one entity regardless of visibility.
    pub async fn get(&self, id: &StixId) -> Result<Option<Entity>, BackendError> {
        let doc = self
            .backend
            .get_document(id.type_prefix(), id.key())
            .await?;
        Ok(doc.and_then(decode))
    }

    /// Fetch several entities in one round trip regardless of visibility.
    /// Missing ids are skipped.
    pub async fn get_many(&self, ids: &[StixId]) -> Result<Vec<Entity>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<DocumentRef> = ids
            .iter()
            .map(|id| DocumentRef::new(id.type_prefix(), id.key()))
            .collect();
        let docs = self.backend.multi_get(&refs).await?;
        Ok(docs.into_iter().filter_map(decode).collect())
    }

    /// Search an index or alias regardless of visibility.
    pub async fn search(&self, index: &str, query: &Query) -> Result<Vec<Entity>, BackendError> {
        let hits = self
            .backend
            .search(index, query, self.config.search_size)
            .await?;
        Ok(decode_all(hits))
    }

    /// Merge `partial` into a stored entity.
    pub async fn update(
        &self,
        id: &StixId,
        partial: &serde_json::Value,
        refresh: bool,
    ) -> Result<(), BackendError> {
        self.backend
            .update_document(id.type_prefix(), id.key(), partial, refresh)
            .await
    }
}

/// Decode search hits into entities, skipping documents that are not valid
/// entity records.
fn decode_all(hits: Vec<serde_json::Value>) -> Vec<Entity> {
    hits.into_iter().filter_map(decode).collect()
}

fn decode(doc: serde_json::Value) -> Option<Entity> {
    match Entity::from_value(doc) {
        Ok(entity) => Some(entity),
        Err(e) => {
            warn!(error = %e, "Skipping malformed entity document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cti_graph_repository::InMemoryBackend;

    fn store() -> EntityStore {
        EntityStore::new(Arc::new(InMemoryBackend::new()), EngineConfig::default())
    }

    fn caller() -> StixId {
        StixId::parse("identity--caller").unwrap()
    }

    #[tokio::test]
    async fn test_first_write_creates() {
        let store = store();
        let tool = Entity::new(EntityType::Tool).with_property("name", "nmap");
        let outcome = store.index_entity(&caller(), &tool, true, true).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Created(tool.id.clone()));
        assert_eq!(store.get(&tool.id).await.unwrap(), Some(tool));
    }

    #[tokio::test]
    async fn test_repeat_write_without_up_version_is_skipped() {
        let store = store();
        let tool = Entity::new(EntityType::Tool);
        store.index_entity(&caller(), &tool, false, false).await.unwrap();
        let outcome = store.index_entity(&caller(), &tool, false, false).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Skipped(tool.id.clone()));
    }

    #[tokio::test]
    async fn test_up_version_revokes_previous() {
        let store = store();
        let tool = Entity::new(EntityType::Tool).with_property("name", "nmap");
        store.index_entity(&caller(), &tool, true, false).await.unwrap();

        let outcome = store.index_entity(&caller(), &tool, true, true).await.unwrap();
        let IndexOutcome::UpVersioned { previous, current } = outcome else {
            panic!("expected an up-version, got {:?}", outcome);
        };
        assert_eq!(previous, tool.id);
        assert_ne!(current, tool.id);

        let old = store.get(&previous).await.unwrap().unwrap();
        assert!(old.revoked);
        let new = store.get(&current).await.unwrap().unwrap();
        assert!(!new.revoked);
        assert_eq!(new.get_str("name"), Some("nmap"));

        let lineage = store
            .search(
                "relationship",
                &Query::term("relationship_type", DERIVED_FROM),
            )
            .await
            .unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].source_ref(), Some(current));
        assert_eq!(lineage[0].target_ref(), Some(previous));
    }

    #[tokio::test]
    async fn test_invalid_entity_is_not_written() {
        let store = store();
        let mut rel = Entity::relationship(
            &StixId::parse("indicator--1").unwrap(),
            "indicates",
            &StixId::parse("attack-pattern--2").unwrap(),
        );
        rel.properties.remove("source_ref");
        let result = store.index_entity(&caller(), &rel, true, false).await;
        assert!(matches!(result, Err(BackendError::ValidationError(_))));
        assert!(!store.exists(&rel.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let store = store();
        let a = Entity::new(EntityType::Tool);
        let b = Entity::new(EntityType::Malware);
        store
            .index_entities(&caller(), &[a.clone(), b.clone()], false, true)
            .await
            .unwrap();
        let missing = StixId::generate(EntityType::Tool);
        let found = store
            .get_many(&[a.id.clone(), missing, b.id.clone()])
            .await
            .unwrap();
        assert_eq!(found, vec![a, b]);
    }
}
