//! Search backend trait definition.
//!
//! This module defines the capability the graph store needs from a document
//! search backend: document storage keyed by index and id, boolean querying,
//! filtered alias indirection with atomic updates, bulk multi-get and
//! reindexing between indices.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::BackendError;
use crate::query::Query;

/// A single alias modification, applied atomically with the others in the
/// same [`SearchBackend::update_aliases`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum AliasAction {
    /// Point `alias` at `index`, optionally restricted by a filter.
    Add {
        index: String,
        alias: String,
        filter: Option<Query>,
    },
    /// Remove `alias` from `index`.
    Remove { index: String, alias: String },
    /// Move `alias` from index `from` to index `to`, keeping whatever filter
    /// it carried on `from`.
    Retarget {
        alias: String,
        from: String,
        to: String,
    },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Add {
            index: index.into(),
            alias: alias.into(),
            filter: None,
        }
    }

    pub fn add_filtered(index: impl Into<String>, alias: impl Into<String>, filter: Query) -> Self {
        Self::Add {
            index: index.into(),
            alias: alias.into(),
            filter: Some(filter),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn retarget(
        alias: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::Retarget {
            alias: alias.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Address of one document for bulk retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub index: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
        }
    }
}

/// Abstracts the underlying document search backend (OpenSearch, in-memory, ...).
///
/// Every name accepted as `index` may be a concrete index or an alias. Searching
/// through a filtered alias applies the alias filter; writes go through
/// single-index aliases.
///
/// All methods return `Result<T, BackendError>` for consistent error handling across
/// different backend implementations.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Store a document, replacing any document with the same id.
    ///
    /// # Arguments
    ///
    /// * `index` - Index or single-index alias to write to
    /// * `id` - Document id
    /// * `document` - Document source
    /// * `refresh` - Make the write visible to search before returning
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the document was stored
    /// * `Err(BackendError)` - If the write fails
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        refresh: bool,
    ) -> Result<(), BackendError>;

    /// Check whether a document exists. A missing index counts as a missing document.
    async fn document_exists(&self, index: &str, id: &str) -> Result<bool, BackendError>;

    /// Merge `partial` into an existing document.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the document was updated
    /// * `Err(BackendError::DocumentNotFound)` - If there is no such document
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
        refresh: bool,
    ) -> Result<(), BackendError>;

    /// Fetch one document source by id, ignoring alias filters.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, BackendError>;

    /// Fetch several documents in one round trip, ignoring alias filters.
    /// Missing documents are skipped.
    async fn multi_get(&self, docs: &[DocumentRef]) -> Result<Vec<Value>, BackendError>;

    /// Return the sources of up to `size` documents matching `query`.
    ///
    /// # Arguments
    ///
    /// * `index` - Index or alias to search; alias filters apply
    /// * `query` - The query to run
    /// * `size` - Maximum number of hits
    async fn search(&self, index: &str, query: &Query, size: usize) -> Result<Vec<Value>, BackendError>;

    /// Count documents in an index or alias.
    async fn count(&self, index: &str) -> Result<u64, BackendError>;

    /// Create an index with the given settings and mappings body.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), BackendError>;

    /// Check whether a concrete index exists.
    async fn index_exists(&self, index: &str) -> Result<bool, BackendError>;

    /// Return the live field mapping (`{"properties": ...}`) of the index behind
    /// `index`, or `None` when neither an index nor an alias of that name exists.
    async fn get_mapping(&self, index: &str) -> Result<Option<Value>, BackendError>;

    /// Copy every document from `source` into `dest`.
    async fn reindex(&self, source: &str, dest: &str) -> Result<(), BackendError>;

    /// Check whether an alias exists.
    async fn alias_exists(&self, alias: &str) -> Result<bool, BackendError>;

    /// List the concrete indices an alias points at (empty when it does not exist).
    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, BackendError>;

    /// List the aliases pointing at a concrete index.
    async fn aliases_for_index(&self, index: &str) -> Result<Vec<String>, BackendError>;

    /// List every alias name.
    async fn list_aliases(&self) -> Result<Vec<String>, BackendError>;

    /// Apply alias additions and removals as one atomic operation.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError>;

    /// Add `clause` as an extra alternative to the any-of filter of every index
    /// behind `alias`, keeping the alias name.
    async fn extend_alias_filter(&self, alias: &str, clause: &Query) -> Result<(), BackendError>;
}
