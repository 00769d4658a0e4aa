//! Live index mapping synchronization.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use crate::mapping::generator::mapping_covers;
use crate::mapping::schema::{PropertySchema, PropertySchemas};
use crate::mapping::{INTEL_ALIAS, SDO_ALIAS};
use cti_graph_repository::opensearch::{dated_index_name, IndexConfig};
use cti_graph_repository::{AliasAction, BackendError, SearchBackend};
use cti_graph_shared::EntityType;

/// What synchronizing one entity type did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No index existed; a dated index was created with its aliases.
    Created { index: String },
    /// The live mapping already provides every field.
    Unchanged,
    /// A new dated index replaced the previous ones behind the aliases.
    Migrated { from: Vec<String>, to: String },
    /// The mapping differs but today's index already exists.
    AlreadyMigratedToday { index: String },
}

/// Per-type outcome of a full synchronization pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(EntityType, Result<SyncOutcome, BackendError>)>,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = (EntityType, &BackendError)> {
        self.outcomes
            .iter()
            .filter_map(|(t, result)| result.as_ref().err().map(|e| (*t, e)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn outcome(&self, entity_type: EntityType) -> Option<&Result<SyncOutcome, BackendError>> {
        self.outcomes
            .iter()
            .find(|(t, _)| *t == entity_type)
            .map(|(_, result)| result)
    }
}

/// Keeps each entity type's index mapping in line with its property schema.
///
/// Every type is served by a dated physical index (`indicator--20240131`)
/// reached through the type alias, the `intel` alias and, for domain objects,
/// the `sdo` alias. A mapping change never alters a live index: a new dated
/// index is created, documents are copied over and the aliases are swapped in
/// one atomic update.
#[derive(Clone)]
pub struct MappingSync {
    backend: Arc<dyn SearchBackend>,
    index_config: IndexConfig,
}

impl MappingSync {
    pub fn new(backend: Arc<dyn SearchBackend>, index_config: IndexConfig) -> Self {
        Self {
            backend,
            index_config,
        }
    }

    /// Synchronize one entity type against today's date.
    pub async fn sync_mapping(
        &self,
        entity_type: EntityType,
        schema: &PropertySchema,
    ) -> Result<SyncOutcome, BackendError> {
        self.sync_mapping_on(entity_type, schema, Utc::now().date_naive())
            .await
    }

    /// Synchronize one entity type, naming any new index after `today`.
    ///
    /// # Returns
    ///
    /// * `Ok(SyncOutcome)` - What was done
    /// * `Err(BackendError)` - If a backend call fails; aliases are left as they were
    #[instrument(skip(self, schema), fields(entity_type = %entity_type.as_str()))]
    pub async fn sync_mapping_on(
        &self,
        entity_type: EntityType,
        schema: &PropertySchema,
        today: NaiveDate,
    ) -> Result<SyncOutcome, BackendError> {
        let alias = entity_type.as_str();
        let target = schema.to_mapping();
        let new_index = dated_index_name(alias, today);

        let Some(live) = self.backend.get_mapping(alias).await? else {
            self.backend
                .create_index(&new_index, &self.index_config.index_body(&target))
                .await?;
            self.backend
                .update_aliases(&alias_additions(entity_type, &new_index))
                .await?;
            info!(index = %new_index, "Index created");
            return Ok(SyncOutcome::Created { index: new_index });
        };

        if mapping_covers(&live, &target) {
            return Ok(SyncOutcome::Unchanged);
        }

        if self.backend.index_exists(&new_index).await? {
            warn!(index = %new_index, "Mapping changed but today's index already exists, try again tomorrow");
            return Ok(SyncOutcome::AlreadyMigratedToday { index: new_index });
        }

        let previous = self.backend.indices_for_alias(alias).await?;
        if previous.is_empty() {
            return Err(BackendError::mapping(format!(
                "{} is a concrete index, not an alias; it cannot be migrated",
                alias
            )));
        }

        self.backend
            .create_index(&new_index, &self.index_config.index_body(&target))
            .await?;
        if self.backend.count(alias).await? > 0 {
            self.backend.reindex(alias, &new_index).await?;
        }

        let managed = alias_names(entity_type);
        let mut actions = Vec::new();
        let mut carried = 0;
        for old in &previous {
            actions.extend(managed.iter().map(|name| AliasAction::remove(old.clone(), *name)));
            // Visibility views and any other alias follow the data, filters included.
            for other in self.backend.aliases_for_index(old).await? {
                if !managed.contains(&other.as_str()) {
                    actions.push(AliasAction::retarget(other, old.clone(), new_index.clone()));
                    carried += 1;
                }
            }
        }
        actions.extend(alias_additions(entity_type, &new_index));
        self.backend.update_aliases(&actions).await?;

        info!(from = ?previous, to = %new_index, carried_aliases = carried, "Index migrated");
        Ok(SyncOutcome::Migrated {
            from: previous,
            to: new_index,
        })
    }

    /// Synchronize every type in `schemas`. A failing type is logged and
    /// reported; it never stops the others.
    pub async fn sync_all(&self, schemas: &PropertySchemas) -> SyncReport {
        let mut report = SyncReport::default();
        for (entity_type, schema) in schemas.iter() {
            let result = self.sync_mapping(entity_type, schema).await;
            if let Err(e) = &result {
                error!(entity_type = %entity_type.as_str(), error = %e, "Mapping sync failed");
            }
            report.outcomes.push((entity_type, result));
        }
        info!(
            types = report.outcomes.len(),
            failed = report.failures().count(),
            "Mapping sync finished"
        );
        report
    }
}

fn alias_names(entity_type: EntityType) -> Vec<&'static str> {
    let mut names = vec![entity_type.as_str(), INTEL_ALIAS];
    if entity_type.is_domain_object() {
        names.push(SDO_ALIAS);
    }
    names
}

fn alias_additions(entity_type: EntityType, index: &str) -> Vec<AliasAction> {
    alias_names(entity_type)
        .into_iter()
        .map(|name| AliasAction::add(index, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::schema::PropertyKind;
    use cti_graph_repository::{InMemoryBackend, Query};
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn sync() -> (Arc<InMemoryBackend>, MappingSync) {
        let backend = Arc::new(InMemoryBackend::new());
        let sync = MappingSync::new(backend.clone(), IndexConfig::default());
        (backend, sync)
    }

    fn tool_schema() -> PropertySchema {
        PropertySchemas::builtin()
            .get(EntityType::Tool)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let (backend, sync) = sync();
        let schema = tool_schema();

        let first = sync.sync_mapping_on(EntityType::Tool, &schema, day(1)).await.unwrap();
        assert_eq!(
            first,
            SyncOutcome::Created {
                index: "tool--20240301".to_string()
            }
        );
        for alias in ["tool", INTEL_ALIAS, SDO_ALIAS] {
            assert_eq!(
                backend.indices_for_alias(alias).await.unwrap(),
                vec!["tool--20240301".to_string()]
            );
        }

        let second = sync.sync_mapping_on(EntityType::Tool, &schema, day(2)).await.unwrap();
        assert_eq!(second, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_cyber_observables_skip_sdo_alias() {
        let (backend, sync) = sync();
        let schema = PropertySchemas::builtin()
            .get(EntityType::Ipv4Addr)
            .unwrap()
            .clone();
        sync.sync_mapping_on(EntityType::Ipv4Addr, &schema, day(1)).await.unwrap();
        assert!(backend.alias_exists(INTEL_ALIAS).await.unwrap());
        assert!(!backend.alias_exists(SDO_ALIAS).await.unwrap());
    }

    #[tokio::test]
    async fn test_migration_moves_documents_and_aliases() {
        let (backend, sync) = sync();
        let schema = tool_schema();
        sync.sync_mapping_on(EntityType::Tool, &schema, day(1)).await.unwrap();
        backend
            .index_document("tool", "abc", &json!({"id": "tool--abc", "type": "tool"}), true)
            .await
            .unwrap();

        let mut changed = schema.clone();
        changed.insert("x_vendor", PropertyKind::Taxonomy);
        let outcome = sync.sync_mapping_on(EntityType::Tool, &changed, day(2)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Migrated {
                from: vec!["tool--20240301".to_string()],
                to: "tool--20240302".to_string()
            }
        );
        for alias in ["tool", INTEL_ALIAS, SDO_ALIAS] {
            assert_eq!(
                backend.indices_for_alias(alias).await.unwrap(),
                vec!["tool--20240302".to_string()]
            );
        }
        assert!(backend.document_exists("tool", "abc").await.unwrap());

        let again = sync.sync_mapping_on(EntityType::Tool, &changed, day(3)).await.unwrap();
        assert_eq!(again, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_migration_carries_filtered_aliases() {
        let (backend, sync) = sync();
        let schema = tool_schema();
        sync.sync_mapping_on(EntityType::Tool, &schema, day(1)).await.unwrap();
        let filter = Query::any(vec![Query::not(Query::exists("object_marking_refs"))]);
        backend
            .update_aliases(&[AliasAction::add_filtered(
                "tool--20240301",
                "intel--reader--20240302",
                filter.clone(),
            )])
            .await
            .unwrap();

        let mut changed = schema.clone();
        changed.insert("x_vendor", PropertyKind::Taxonomy);
        sync.sync_mapping_on(EntityType::Tool, &changed, day(2)).await.unwrap();

        assert_eq!(
            backend.indices_for_alias("intel--reader--20240302").await.unwrap(),
            vec!["tool--20240302".to_string()]
        );
        assert_eq!(
            backend.alias_filter("intel--reader--20240302", "tool--20240302").await,
            Some(filter)
        );
        assert!(backend.aliases_for_index("tool--20240301").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_migration_same_day_is_deferred() {
        let (backend, sync) = sync();
        let schema = tool_schema();
        sync.sync_mapping_on(EntityType::Tool, &schema, day(1)).await.unwrap();

        let mut changed = schema.clone();
        changed.insert("x_vendor", PropertyKind::Taxonomy);
        let outcome = sync.sync_mapping_on(EntityType::Tool, &changed, day(1)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::AlreadyMigratedToday {
                index: "tool--20240301".to_string()
            }
        );
        assert_eq!(
            backend.indices_for_alias("tool").await.unwrap(),
            vec!["tool--20240301".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sync_all_reports_failures_without_stopping() {
        let (backend, sync) = sync();
        // A concrete index squatting on the alias name cannot be migrated.
        backend
            .index_document("tool", "abc", &json!({"id": "tool--abc"}), true)
            .await
            .unwrap();

        let report = sync.sync_all(&PropertySchemas::builtin()).await;
        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);
        assert!(report.outcome(EntityType::Tool).unwrap().is_err());
        assert!(matches!(
            report.outcome(EntityType::Indicator),
            Some(Ok(SyncOutcome::Created { .. }))
        ));
    }
}
