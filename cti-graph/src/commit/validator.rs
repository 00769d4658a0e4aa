//! Commit validation.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use crate::errors::{CommitError, CommitRejection};
use crate::store::{EntityStore, IndexOutcome};
use cti_graph_repository::BackendError;
use cti_graph_shared::{Entity, EntityType, StixId};

/// `context` of groupings built by [`build_commit`](crate::ingest::build_commit).
pub const COMMIT_CONTEXT: &str = "commit";

/// Accepts or rejects a batch as one atomic, attributable write.
///
/// A batch is a valid commit when it holds exactly one grouping, the
/// grouping's `object_refs` equal the set of every other id in the batch, and
/// the grouping's author is an identity found in the batch or in the store.
#[derive(Clone)]
pub struct CommitValidator {
    store: EntityStore,
}

impl CommitValidator {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Validate a batch. Validation happens entirely before any write.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The batch is a valid commit
    /// * `Err(CommitError::Rejected)` - With the first reason found
    /// * `Err(CommitError::Backend)` - If the author lookup fails
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn validate_commit(&self, batch: &[Entity]) -> Result<(), CommitError> {
        let grouping = check_structure(batch)?;
        let author = grouping
            .created_by_ref
            .as_ref()
            .ok_or(CommitRejection::MissingAuthor)?;
        self.resolve_author(author, batch).await?;
        debug!(grouping = %grouping.id, author = %author, "Commit accepted");
        Ok(())
    }

    /// Boolean form of [`CommitValidator::validate_commit`]. Only backend
    /// faults are errors.
    pub async fn is_valid_commit(&self, batch: &[Entity]) -> Result<bool, BackendError> {
        match self.validate_commit(batch).await {
            Ok(()) => Ok(true),
            Err(CommitError::Rejected(reason)) => {
                debug!(reason = %reason, "Commit rejected");
                Ok(false)
            }
            Err(CommitError::Backend(e)) => Err(e),
        }
    }

    /// Validate a batch and store it. Nothing is written when validation fails.
    pub async fn store_commit(
        &self,
        caller: &StixId,
        batch: &[Entity],
        up_version: bool,
    ) -> Result<Vec<IndexOutcome>, CommitError> {
        if let Err(e) = self.validate_commit(batch).await {
            warn!(caller = %caller, error = %e, "Refusing to store commit");
            return Err(e);
        }
        let outcomes = self
            .store
            .index_entities(caller, batch, up_version, true)
            .await?;
        info!(caller = %caller, stored = outcomes.len(), "Commit stored");
        Ok(outcomes)
    }

    async fn resolve_author(&self, author: &StixId, batch: &[Entity]) -> Result<(), CommitError> {
        if !author.is_type(EntityType::Identity) {
            return Err(CommitRejection::UnresolvedAuthor(author.clone()).into());
        }
        if batch
            .iter()
            .any(|e| e.id == *author && e.entity_type == EntityType::Identity)
        {
            return Ok(());
        }
        match self.store.get(author).await? {
            Some(identity) if identity.entity_type == EntityType::Identity => Ok(()),
            _ => Err(CommitRejection::UnresolvedAuthor(author.clone()).into()),
        }
    }
}

/// Check everything that does not need the store and return the grouping.
pub fn check_structure(batch: &[Entity]) -> Result<&Entity, CommitRejection> {
    for entity in batch {
        entity.validate()?;
    }

    let groupings: Vec<&Entity> = batch
        .iter()
        .filter(|e| e.entity_type == EntityType::Grouping)
        .collect();
    let grouping = match groupings.as_slice() {
        [] => return Err(CommitRejection::NoGrouping),
        [grouping] => *grouping,
        many => return Err(CommitRejection::MultipleGroupings(many.len())),
    };

    let declared: BTreeSet<StixId> = grouping.object_refs().into_iter().collect();
    let members: BTreeSet<StixId> = batch
        .iter()
        .filter(|e| e.entity_type != EntityType::Grouping)
        .map(|e| e.id.clone())
        .collect();

    let undeclared: Vec<StixId> = members.difference(&declared).cloned().collect();
    if !undeclared.is_empty() {
        return Err(CommitRejection::MissingMembers(undeclared));
    }
    let absent: Vec<StixId> = declared.difference(&members).cloned().collect();
    if !absent.is_empty() {
        return Err(CommitRejection::UnexpectedMembers(absent));
    }
    Ok(grouping)
}
