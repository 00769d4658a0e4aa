//! Molecule expansion on behalf of a caller.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::errors::ExpandError;
use crate::expansion::walker::{not_revoked, MoleculeWalker};
use crate::mapping::INTEL_ALIAS;
use crate::store::EntityStore;
use crate::visibility::VisibilityEngine;
use cti_graph_repository::Query;
use cti_graph_shared::{Entity, StixId};

/// A molecule expansion request.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub seeds: Vec<StixId>,
    pub molecule: String,
    pub pivot: bool,
    pub return_objects: bool,
    /// Extra restriction applied to the objects returned.
    pub filter: Option<Query>,
}

impl ExpandRequest {
    /// Schema-closed walk returning ids only.
    pub fn new(seeds: Vec<StixId>, molecule: impl Into<String>) -> Self {
        Self {
            seeds,
            molecule: molecule.into(),
            pivot: false,
            return_objects: false,
            filter: None,
        }
    }

    pub fn pivot(mut self, pivot: bool) -> Self {
        self.pivot = pivot;
        self
    }

    pub fn with_objects(mut self) -> Self {
        self.return_objects = true;
        self
    }

    pub fn with_filter(mut self, filter: Query) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Result of a successful expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpansionOutput {
    /// The closed id set, sorted.
    Ids(Vec<StixId>),
    /// The entities of the closed set the caller may see, sorted by id.
    Objects(Vec<Entity>),
}

impl ExpansionOutput {
    pub fn len(&self) -> usize {
        match self {
            ExpansionOutput::Ids(ids) => ids.len(),
            ExpansionOutput::Objects(objects) => objects.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the output, whichever form it takes.
    pub fn ids(&self) -> Vec<StixId> {
        match self {
            ExpansionOutput::Ids(ids) => ids.clone(),
            ExpansionOutput::Objects(objects) => objects.iter().map(|o| o.id.clone()).collect(),
        }
    }

    pub fn into_objects(self) -> Vec<Entity> {
        match self {
            ExpansionOutput::Objects(objects) => objects,
            ExpansionOutput::Ids(_) => Vec::new(),
        }
    }
}

/// Graph expansion engine.
///
/// Composes the molecule walk with the caller's visibility view: the walk
/// discovers ids regardless of markings, and the final object fetch goes
/// through the view so masked entities are never returned.
#[derive(Clone)]
pub struct ExpansionEngine {
    walker: MoleculeWalker,
    visibility: Arc<VisibilityEngine>,
    store: EntityStore,
    config: EngineConfig,
}

impl ExpansionEngine {
    pub fn new(
        walker: MoleculeWalker,
        visibility: Arc<VisibilityEngine>,
        store: EntityStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            walker,
            visibility,
            store,
            config,
        }
    }

    /// Expand a molecule from seed ids.
    ///
    /// # Arguments
    ///
    /// * `caller` - Identity the objects are fetched for
    /// * `request` - Seeds, molecule and output options
    ///
    /// # Returns
    ///
    /// * `Ok(ExpansionOutput)` - The closed id set, or the visible objects in it
    /// * `Err(ExpandError)` - Never an empty success: a failed walk is an error
    #[instrument(skip(self, request), fields(caller = %caller, molecule = %request.molecule, pivot = request.pivot))]
    pub async fn expand(
        &self,
        caller: &StixId,
        request: &ExpandRequest,
    ) -> Result<ExpansionOutput, ExpandError> {
        let ids = self
            .walker
            .walk(&request.seeds, &request.molecule, request.pivot)
            .await?;
        if !request.return_objects {
            return Ok(ExpansionOutput::Ids(ids));
        }

        let molecule = self
            .walker
            .registry()
            .get(&request.molecule)
            .ok_or_else(|| ExpandError::UnknownMolecule(request.molecule.clone()))?;

        let view = self
            .visibility
            .visible_view(caller, INTEL_ALIAS, false)
            .await?;

        if ids.len() > self.config.search_size {
            warn!(
                found = ids.len(),
                search_size = self.config.search_size,
                "Molecule larger than the search size, returned objects are truncated"
            );
        }

        let mut clauses = vec![
            Query::terms("id", ids.iter().map(StixId::as_str)),
            molecule.schema_filter(),
            not_revoked(),
        ];
        if let Some(filter) = &request.filter {
            clauses.push(filter.clone());
        }

        let mut objects = self.store.search(view.alias(), &Query::all(clauses)).await?;
        objects.retain(|o| molecule.admits(o));
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects.dedup_by(|a, b| a.id == b.id);

        debug!(
            found = ids.len(),
            visible = objects.len(),
            search_size = self.config.search_size,
            "Molecule objects fetched"
        );
        Ok(ExpansionOutput::Objects(objects))
    }
}
