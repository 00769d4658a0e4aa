//! Caller-facing facade over the graph store.

mod consumers;
mod search;

pub use consumers::{Focus, Incident, ASSIGNED_TO_FIELD};
pub use search::{FreeTextHit, SearchRequest};

use std::sync::Arc;

use tracing::{info, instrument};

use crate::bootstrap::SystemContext;
use crate::commit::CommitValidator;
use crate::config::EngineConfig;
use crate::errors::{CommitError, ExpandError, MarkingError};
use crate::expansion::{ExpandRequest, ExpansionEngine, ExpansionOutput, MoleculeWalker};
use crate::mapping::{MappingSync, PropertySchemas, SyncReport};
use crate::molecule::MoleculeRegistry;
use crate::store::{EntityStore, IndexOutcome};
use crate::visibility::{ViewHandle, VisibilityEngine};
use cti_graph_repository::opensearch::IndexConfig;
use cti_graph_repository::{BackendError, SearchBackend};
use cti_graph_shared::{Entity, StixId};

/// Entry point to the graph store.
///
/// Every read on behalf of a caller goes through the caller's visibility
/// view. Writes are attributed to the caller and up-versioned on request.
#[derive(Clone)]
pub struct IntelClient {
    store: EntityStore,
    walker: MoleculeWalker,
    visibility: Arc<VisibilityEngine>,
    expansion: ExpansionEngine,
    validator: CommitValidator,
    mapping: MappingSync,
    system: SystemContext,
    config: EngineConfig,
}

impl IntelClient {
    /// Wire every component over one backend.
    ///
    /// # Arguments
    ///
    /// * `backend` - Search backend holding the entity indices
    /// * `registry` - Molecules available to expansions
    /// * `config` - Expansion and search limits
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        registry: Arc<MoleculeRegistry>,
        config: EngineConfig,
    ) -> Self {
        let system = SystemContext::new();
        let store = EntityStore::new(backend.clone(), config);
        let walker = MoleculeWalker::new(store.clone(), registry, config);
        let visibility = Arc::new(VisibilityEngine::new(
            store.clone(),
            walker.clone(),
            system.identity().clone(),
        ));
        let expansion = ExpansionEngine::new(walker.clone(), visibility.clone(), store.clone(), config);
        let validator = CommitValidator::new(store.clone());
        let mapping = MappingSync::new(backend, IndexConfig::default());

        Self {
            store,
            walker,
            visibility,
            expansion,
            validator,
            mapping,
            system,
            config,
        }
    }

    /// Use `index_config` for indices created by mapping synchronization.
    pub fn with_index_config(mut self, index_config: IndexConfig) -> Self {
        self.mapping = MappingSync::new(self.store.backend().clone(), index_config);
        self
    }

    pub fn system(&self) -> &SystemContext {
        &self.system
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Synchronize every index mapping, then store the core data.
    ///
    /// Mapping failures are reported per type and do not stop the pass.
    ///
    /// # Returns
    ///
    /// * `Ok(SyncReport)` - Per-type synchronization outcomes
    /// * `Err(BackendError)` - If the core data could not be stored
    pub async fn setup(&self, schemas: &PropertySchemas) -> Result<SyncReport, BackendError> {
        let report = self.mapping.sync_all(schemas).await;
        self.system.store_core_data(&self.store).await?;
        info!(clean = report.is_clean(), "Setup complete");
        Ok(report)
    }

    pub fn mapping(&self) -> &MappingSync {
        &self.mapping
    }

    /// Store an entity on behalf of `caller` and make it searchable.
    #[instrument(skip(self, entity), fields(caller = %caller, entity_id = %entity.id))]
    pub async fn index_entity(
        &self,
        caller: &StixId,
        entity: &Entity,
        up_version: bool,
    ) -> Result<IndexOutcome, BackendError> {
        self.store.index_entity(caller, entity, up_version, true).await
    }

    /// Store several entities on behalf of `caller`, refreshing once at the end.
    pub async fn index_entities(
        &self,
        caller: &StixId,
        entities: &[Entity],
        up_version: bool,
    ) -> Result<Vec<IndexOutcome>, BackendError> {
        self.store
            .index_entities(caller, entities, up_version, true)
            .await
    }

    pub async fn validate_commit(&self, batch: &[Entity]) -> Result<(), CommitError> {
        self.validator.validate_commit(batch).await
    }

    pub async fn is_valid_commit(&self, batch: &[Entity]) -> Result<bool, BackendError> {
        self.validator.is_valid_commit(batch).await
    }

    /// Validate a commit and store it. Nothing is written on rejection.
    pub async fn store_commit(
        &self,
        caller: &StixId,
        batch: &[Entity],
        up_version: bool,
    ) -> Result<Vec<IndexOutcome>, CommitError> {
        self.validator.store_commit(caller, batch, up_version).await
    }

    /// See [`VisibilityEngine::visible_view`].
    pub async fn visible_view(
        &self,
        caller: &StixId,
        base: &str,
        force_refresh: bool,
    ) -> Result<ViewHandle, MarkingError> {
        self.visibility.visible_view(caller, base, force_refresh).await
    }

    /// See [`VisibilityEngine::create_distribution_marking`].
    pub async fn create_distribution_marking(
        &self,
        caller: &StixId,
        name: &str,
        tlp_base: &StixId,
        distribution_refs: &[StixId],
    ) -> Result<StixId, MarkingError> {
        self.visibility
            .create_distribution_marking(caller, name, tlp_base, distribution_refs)
            .await
    }

    /// See [`VisibilityEngine::add_open_marking`].
    pub async fn add_open_marking(
        &self,
        caller: &StixId,
        marking: &StixId,
    ) -> Result<StixId, MarkingError> {
        self.visibility.add_open_marking(caller, marking).await
    }

    /// See [`ExpansionEngine::expand`].
    pub async fn expand(
        &self,
        caller: &StixId,
        request: &ExpandRequest,
    ) -> Result<ExpansionOutput, ExpandError> {
        self.expansion.expand(caller, request).await
    }
}
