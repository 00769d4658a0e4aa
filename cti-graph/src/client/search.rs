//! Caller-aware search and object fetch.

use tracing::{debug, instrument};

use crate::client::IntelClient;
use crate::errors::{ExpandError, MarkingError};
use crate::expansion::{not_revoked, ExpandRequest};
use crate::mapping::INTEL_ALIAS;
use cti_graph_repository::Query;
use cti_graph_shared::{Entity, StixId};

/// A search run on behalf of a caller.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Index or alias the caller's view is built over.
    pub index: String,
    pub query: Query,
    /// Restrict hits to entities fitting any of these molecules.
    pub molecules: Vec<String>,
    pub include_revoked: bool,
}

impl SearchRequest {
    /// Search every entity type.
    pub fn new(query: Query) -> Self {
        Self {
            index: INTEL_ALIAS.to_string(),
            query,
            molecules: Vec::new(),
            include_revoked: false,
        }
    }

    pub fn in_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn within_molecule(mut self, molecule: impl Into<String>) -> Self {
        self.molecules.push(molecule.into());
        self
    }

    pub fn include_revoked(mut self) -> Self {
        self.include_revoked = true;
        self
    }
}

/// One free-text hit, with the molecule grown around it when one was asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeTextHit {
    pub entity: Entity,
    /// Visible members of the requested molecule around `entity`; empty when
    /// no molecule was requested or the entity fits none.
    pub molecule: Vec<Entity>,
}

impl IntelClient {
    /// Search through the caller's visibility view.
    ///
    /// # Returns
    ///
    /// * `Ok(entities)` - Visible hits, revoked ones excluded unless requested
    /// * `Err(ExpandError::UnknownMolecule)` - If a molecule filter is not registered
    #[instrument(skip(self, request), fields(caller = %caller, index = %request.index))]
    pub async fn search(
        &self,
        caller: &StixId,
        request: &SearchRequest,
    ) -> Result<Vec<Entity>, ExpandError> {
        let mut clauses = vec![request.query.clone()];
        if !request.include_revoked {
            clauses.push(not_revoked());
        }
        if !request.molecules.is_empty() {
            let registry = self.walker.registry();
            let filters = request
                .molecules
                .iter()
                .map(|name| {
                    registry
                        .get(name)
                        .map(|m| m.schema_filter())
                        .ok_or_else(|| ExpandError::UnknownMolecule(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            clauses.push(Query::any(filters));
        }

        let view = self
            .visibility
            .visible_view(caller, &request.index, false)
            .await?;
        let hits = self.store.search(view.alias(), &Query::all(clauses)).await?;
        debug!(hits = hits.len(), "Search complete");
        Ok(hits)
    }

    /// Full-text search over every string property the caller may see.
    ///
    /// With a molecule name, each hit is expanded into the molecule around
    /// it; hits that fit no instance of the molecule keep an empty one.
    ///
    /// # Returns
    ///
    /// * `Ok(hits)` - Visible matches, empty when nothing matches
    /// * `Err(ExpandError::UnknownMolecule)` - If the molecule is not registered
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn get_free_text(
        &self,
        caller: &StixId,
        phrase: &str,
        molecule: Option<&str>,
    ) -> Result<Vec<FreeTextHit>, ExpandError> {
        if let Some(name) = molecule {
            if self.walker.registry().get(name).is_none() {
                return Err(ExpandError::UnknownMolecule(name.to_string()));
            }
        }

        let query = Query::multi_match(phrase, Vec::<String>::new());
        let entities = self.search(caller, &SearchRequest::new(query)).await?;

        let mut hits = Vec::with_capacity(entities.len());
        for entity in entities {
            let members = match molecule {
                Some(name) => {
                    let request = ExpandRequest::new(vec![entity.id.clone()], name).with_objects();
                    match self.expansion.expand(caller, &request).await {
                        Ok(output) => output.into_objects(),
                        Err(ExpandError::NoSeedMatch { .. }) | Err(ExpandError::PartialMatch { .. }) => {
                            Vec::new()
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => Vec::new(),
            };
            hits.push(FreeTextHit {
                entity,
                molecule: members,
            });
        }
        debug!(hits = hits.len(), "Free-text search complete");
        Ok(hits)
    }

    /// Fetch entities by id through the caller's view. Ids the caller may
    /// not see, or that do not exist, are left out.
    pub async fn get_objects(
        &self,
        caller: &StixId,
        ids: &[StixId],
    ) -> Result<Vec<Entity>, MarkingError> {
        self.get_objects_matching(caller, ids, &[]).await
    }

    /// Like [`IntelClient::get_objects`], keeping only entities whose text
    /// matches at least one of `values`. No values means no text filter.
    pub async fn get_objects_matching(
        &self,
        caller: &StixId,
        ids: &[StixId],
        values: &[&str],
    ) -> Result<Vec<Entity>, MarkingError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let view = self
            .visibility
            .visible_view(caller, INTEL_ALIAS, false)
            .await?;
        let mut clauses = vec![Query::terms("id", ids.iter().map(StixId::as_str))];
        if !values.is_empty() {
            clauses.push(Query::any(
                values
                    .iter()
                    .map(|value| Query::multi_match(*value, Vec::<String>::new()))
                    .collect(),
            ));
        }
        let query = Query::all(clauses);
        let mut objects = self.store.search(view.alias(), &query).await?;
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects.dedup_by(|a, b| a.id == b.id);
        Ok(objects)
    }

    pub async fn get_object(
        &self,
        caller: &StixId,
        id: &StixId,
    ) -> Result<Option<Entity>, MarkingError> {
        let objects = self.get_objects(caller, std::slice::from_ref(id)).await?;
        Ok(objects.into_iter().next())
    }
}
