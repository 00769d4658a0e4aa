//! Per-caller visibility views.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::errors::{ExpandError, MarkingError};
use crate::expansion::{not_revoked, MoleculeWalker};
use crate::molecule::registry::ORG;
use crate::store::EntityStore;
use crate::visibility::view::{is_view_of, view_root, ViewHandle};
use cti_graph_repository::{AliasAction, BackendError, Query};
use cti_graph_shared::marking::{pii_marking_id, DISTRIBUTION_DEFINITION_TYPE, OPEN_MARKINGS_CONTEXT};
use cti_graph_shared::{Entity, EntityType, StixId};

/// Computes what each caller may see and materializes it as filtered aliases.
///
/// A caller sees an entity when any of these holds:
///
/// 1. it carries no markings, or only open markings;
/// 2. it carries a distribution marking listing the caller or an identity
///    reachable from the caller through the organisation chart;
/// 3. its only marking is PII and it is itself an identity or location in the
///    caller's organisation chart.
pub struct VisibilityEngine {
    store: EntityStore,
    walker: MoleculeWalker,
    system_identity: StixId,
    views: RwLock<HashSet<String>>,
}

impl VisibilityEngine {
    /// # Arguments
    ///
    /// * `store` - Unrestricted entity access
    /// * `walker` - Walks the caller's organisation chart
    /// * `system_identity` - Author of the open-markings grouping
    pub fn new(store: EntityStore, walker: MoleculeWalker, system_identity: StixId) -> Self {
        Self {
            store,
            walker,
            system_identity,
            views: RwLock::new(HashSet::new()),
        }
    }

    /// Return the caller's view over `base` for the current day slice,
    /// building it when it does not exist yet or when `force_refresh` is set.
    ///
    /// # Arguments
    ///
    /// * `caller` - Identity the view is for
    /// * `base` - Index or alias the view filters (e.g. `intel`)
    /// * `force_refresh` - Rebuild even when today's view exists
    ///
    /// # Returns
    ///
    /// * `Ok(ViewHandle)` - The alias to search through
    /// * `Err(MarkingError)` - If the caller is not an identity or the backend fails
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn visible_view(
        &self,
        caller: &StixId,
        base: &str,
        force_refresh: bool,
    ) -> Result<ViewHandle, MarkingError> {
        if !caller.is_type(EntityType::Identity) {
            return Err(MarkingError::InvalidCaller(caller.to_string()));
        }

        let view = ViewHandle::new(base, caller, Utc::now().date_naive());
        if !force_refresh {
            if self.views.read().await.contains(view.alias()) {
                return Ok(view);
            }
            if self.store.backend().alias_exists(view.alias()).await? {
                self.remember(&view).await;
                return Ok(view);
            }
        }

        let filter = self.visibility_filter(caller).await?;
        self.install(&view, base, filter).await?;
        self.remember(&view).await;
        info!(alias = %view.alias(), "Visibility view built");
        Ok(view)
    }

    /// Build the any-of filter describing what `caller` may see.
    pub async fn visibility_filter(&self, caller: &StixId) -> Result<Query, MarkingError> {
        let org = self.org_chart(caller).await?;

        let mut principals: BTreeSet<&StixId> = org
            .iter()
            .filter(|id| id.is_type(EntityType::Identity))
            .collect();
        principals.insert(caller);

        let mut pii_subjects: BTreeSet<&StixId> = org
            .iter()
            .filter(|id| id.is_type(EntityType::Identity) || id.is_type(EntityType::Location))
            .collect();
        pii_subjects.insert(caller);

        let mut clauses = vec![Query::not(Query::exists("object_marking_refs"))];

        let open = self.open_markings().await?;
        if !open.is_empty() {
            clauses.push(Query::subset_of(
                "object_marking_refs",
                open.iter().map(StixId::as_str),
            ));
        }

        let distribution = self
            .distribution_markings(principals.iter().map(|id| id.as_str()))
            .await?;
        if !distribution.is_empty() {
            clauses.push(Query::terms(
                "object_marking_refs",
                distribution.iter().map(StixId::as_str),
            ));
        }

        clauses.push(Query::all(vec![
            Query::terms("id", pii_subjects.iter().map(|id| id.as_str())),
            Query::subset_of("object_marking_refs", [pii_marking_id().as_str()]),
        ]));

        debug!(
            org_size = org.len(),
            open_markings = open.len(),
            distribution_markings = distribution.len(),
            "Visibility filter computed"
        );
        Ok(Query::any(clauses))
    }

    /// Add a freshly created distribution marking to the existing views of
    /// every identity it names, keeping the alias names.
    ///
    /// Views of callers who only reach the marking through their organisation
    /// pick it up when their next slice is built.
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of views updated
    /// * `Err(MarkingError::NotDistribution)` - If the marking has no distribution list
    pub async fn update_distribution(&self, marking: &Entity) -> Result<usize, MarkingError> {
        if marking.definition_type() != Some(DISTRIBUTION_DEFINITION_TYPE) {
            return Err(MarkingError::NotDistribution(marking.id.to_string()));
        }

        let clause = Query::term("object_marking_refs", marking.id.as_str());
        let aliases = self.store.backend().list_aliases().await?;
        let mut updated = BTreeSet::new();
        for identity in marking.distribution_refs() {
            for alias in aliases.iter().filter(|a| is_view_of(a, identity.key())) {
                if updated.insert(alias.clone()) {
                    self.store.backend().extend_alias_filter(alias, &clause).await?;
                }
            }
        }

        info!(marking = %marking.id, views = updated.len(), "Distribution applied to views");
        Ok(updated.len())
    }

    /// Ids of the open markings: the union of the members of every live
    /// open-markings grouping authored by the system identity.
    pub async fn open_markings(&self) -> Result<Vec<StixId>, MarkingError> {
        let groupings = self.open_markings_groupings().await?;
        if groupings.is_empty() {
            warn!("No open markings grouping stored");
        }
        let ids: BTreeSet<StixId> = groupings.iter().flat_map(Entity::object_refs).collect();
        Ok(ids.into_iter().collect())
    }

    pub(crate) async fn open_markings_groupings(&self) -> Result<Vec<Entity>, BackendError> {
        let query = Query::all(vec![
            Query::term("context", OPEN_MARKINGS_CONTEXT),
            Query::term("created_by_ref", self.system_identity.as_str()),
            not_revoked(),
        ]);
        self.store
            .search(EntityType::Grouping.as_str(), &query)
            .await
    }

    pub(crate) fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Live distribution markings naming any of `principals`.
    async fn distribution_markings<'a>(
        &self,
        principals: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<StixId>, MarkingError> {
        let query = Query::all(vec![
            Query::term("definition_type", DISTRIBUTION_DEFINITION_TYPE),
            Query::terms("definition.distribution_refs", principals),
            not_revoked(),
        ]);
        let markings = self
            .store
            .search(EntityType::MarkingDefinition.as_str(), &query)
            .await?;
        Ok(markings.into_iter().map(|m| m.id).collect())
    }

    /// Everything reachable from the caller through the organisation chart.
    /// A caller without any organisation data gets an empty chart.
    async fn org_chart(&self, caller: &StixId) -> Result<Vec<StixId>, MarkingError> {
        match self.walker.walk(std::slice::from_ref(caller), ORG, true).await {
            Ok(ids) => Ok(ids),
            Err(ExpandError::Backend(e)) => Err(MarkingError::Backend(e)),
            Err(e) => {
                warn!(caller = %caller, reason = %e, "Authorization gap: no organisation data for caller");
                Ok(Vec::new())
            }
        }
    }

    /// Atomically replace every earlier slice of the caller's view with `view`.
    async fn install(&self, view: &ViewHandle, base: &str, filter: Query) -> Result<(), MarkingError> {
        let backend = self.store.backend();

        let mut indices = backend.indices_for_alias(base).await?;
        if indices.is_empty() && backend.index_exists(base).await? {
            indices.push(base.to_string());
        }
        if indices.is_empty() {
            return Err(BackendError::alias(format!("No index behind {}", base)).into());
        }

        let root = format!("{}--", view_root(base, view.caller()));
        let mut actions = Vec::new();
        for alias in backend.list_aliases().await? {
            if !alias.starts_with(&root) {
                continue;
            }
            for index in backend.indices_for_alias(&alias).await? {
                actions.push(AliasAction::remove(index, alias.clone()));
            }
        }
        for index in indices {
            actions.push(AliasAction::add_filtered(index, view.alias(), filter.clone()));
        }
        backend.update_aliases(&actions).await?;

        let mut views = self.views.write().await;
        views.retain(|alias| !alias.starts_with(&root));
        Ok(())
    }

    async fn remember(&self, view: &ViewHandle) {
        self.views.write().await.insert(view.alias().to_string());
    }
}
