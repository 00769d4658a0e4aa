use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::BackendError;
use crate::interfaces::{AliasAction, DocumentRef, SearchBackend};
use crate::query::{BoolQuery, Query};

#[derive(Debug, Default)]
struct MemoryIndex {
    mappings: Value,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    indices: BTreeMap<String, MemoryIndex>,
    /// alias -> (index -> optional filter)
    aliases: BTreeMap<String, BTreeMap<String, Option<Query>>>,
}

impl MemoryState {
    /// Resolve a name to the concrete indices it covers and their filters.
    fn resolve(&self, name: &str) -> Vec<(String, Option<Query>)> {
        if self.indices.contains_key(name) {
            return vec![(name.to_string(), None)];
        }
        self.aliases
            .get(name)
            .map(|targets| {
                targets
                    .iter()
                    .map(|(index, filter)| (index.clone(), filter.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a name for writing. Unknown names create an index with dynamic
    /// mappings; aliases must point at exactly one index.
    fn write_index(&mut self, name: &str) -> Result<&mut MemoryIndex, BackendError> {
        let target = if self.indices.contains_key(name) {
            name.to_string()
        } else if let Some(targets) = self.aliases.get(name) {
            if targets.len() != 1 {
                return Err(BackendError::index(format!(
                    "Alias {} points at {} indices and has no write index",
                    name,
                    targets.len()
                )));
            }
            targets.keys().next().cloned().unwrap_or_default()
        } else {
            name.to_string()
        };
        Ok(self.indices.entry(target).or_insert_with(|| MemoryIndex {
            mappings: json!({ "properties": {} }),
            documents: BTreeMap::new(),
        }))
    }

    fn find_document(&self, name: &str, id: &str) -> Option<&Value> {
        self.resolve(name)
            .into_iter()
            .find_map(|(index, _)| self.indices.get(&index)?.documents.get(id))
    }

    fn matching<'a>(&'a self, name: &str, query: &'a Query) -> Vec<&'a Value> {
        let mut hits = Vec::new();
        for (index, filter) in self.resolve(name) {
            let Some(idx) = self.indices.get(&index) else {
                continue;
            };
            for doc in idx.documents.values() {
                let visible = filter.as_ref().map(|f| f.matches(doc)).unwrap_or(true);
                if visible && query.matches(doc) {
                    hits.push(doc);
                }
            }
        }
        hits
    }
}

/// In-memory search backend.
///
/// Mirrors the behaviour the graph store relies on from OpenSearch: writes
/// through single-index aliases, filtered aliases applied on search, atomic
/// alias updates and reindexing between indices.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
    searches: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `search` calls served so far.
    pub fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// The filter installed for `alias` on `index`, if any.
    pub async fn alias_filter(&self, alias: &str, index: &str) -> Option<Query> {
        let state = self.state.read().await;
        state.aliases.get(alias)?.get(index)?.clone()
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        _refresh: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let target = state.write_index(index)?;
        target.documents.insert(id.to_string(), document.clone());
        debug!(index = %index, doc_id = %id, "Document indexed");
        Ok(())
    }

    async fn document_exists(&self, index: &str, id: &str) -> Result<bool, BackendError> {
        let state = self.state.read().await;
        Ok(state.find_document(index, id).is_some())
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
        _refresh: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let Some((target, _)) = state
            .resolve(index)
            .into_iter()
            .find(|(name, _)| {
                state
                    .indices
                    .get(name)
                    .map(|idx| idx.documents.contains_key(id))
                    .unwrap_or(false)
            })
        else {
            return Err(BackendError::document_not_found(index, id));
        };

        let doc = state
            .indices
            .get_mut(&target)
            .and_then(|idx| idx.documents.get_mut(id))
            .ok_or_else(|| BackendError::document_not_found(index, id))?;
        if let (Some(doc), Some(fields)) = (doc.as_object_mut(), partial.as_object()) {
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, BackendError> {
        let state = self.state.read().await;
        Ok(state.find_document(index, id).cloned())
    }

    async fn multi_get(&self, docs: &[DocumentRef]) -> Result<Vec<Value>, BackendError> {
        let state = self.state.read().await;
        Ok(docs
            .iter()
            .filter_map(|d| state.find_document(&d.index, &d.id).cloned())
            .collect())
    }

    async fn search(
        &self,
        index: &str,
        query: &Query,
        size: usize,
    ) -> Result<Vec<Value>, BackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        Ok(state
            .matching(index, query)
            .into_iter()
            .take(size)
            .cloned()
            .collect())
    }

    async fn count(&self, index: &str) -> Result<u64, BackendError> {
        let state = self.state.read().await;
        Ok(state.matching(index, &Query::MatchAll).len() as u64)
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(BackendError::index_creation(format!(
                "Index {} already exists",
                index
            )));
        }
        let mappings = body
            .get("mappings")
            .cloned()
            .unwrap_or_else(|| json!({ "properties": {} }));
        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                mappings,
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let state = self.state.read().await;
        Ok(state.indices.contains_key(index))
    }

    async fn get_mapping(&self, index: &str) -> Result<Option<Value>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .resolve(index)
            .into_iter()
            .map(|(name, _)| name)
            .max()
            .and_then(|name| state.indices.get(&name))
            .map(|idx| idx.mappings.clone()))
    }

    async fn reindex(&self, source: &str, dest: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let copied: Vec<(String, Value)> = state
            .resolve(source)
            .into_iter()
            .filter_map(|(name, _)| state.indices.get(&name))
            .flat_map(|idx| idx.documents.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect();
        let target = state
            .indices
            .get_mut(dest)
            .ok_or_else(|| BackendError::reindex(format!("No such index: {}", dest)))?;
        target.documents.extend(copied);
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .aliases
            .get(alias)
            .map(|targets| !targets.is_empty())
            .unwrap_or(false))
    }

    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .aliases
            .get(alias)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_aliases(&self) -> Result<Vec<String>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .aliases
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn aliases_for_index(&self, index: &str) -> Result<Vec<String>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .aliases
            .iter()
            .filter(|(_, targets)| targets.contains_key(index))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        // Work on a copy so a bad action leaves every alias untouched.
        let mut aliases = state.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add {
                    index,
                    alias,
                    filter,
                } => {
                    if !state.indices.contains_key(index) {
                        return Err(BackendError::alias(format!("No such index: {}", index)));
                    }
                    aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone(), filter.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(targets) = aliases.get_mut(alias) {
                        targets.remove(index);
                    }
                }
                AliasAction::Retarget { alias, from, to } => {
                    if !state.indices.contains_key(to) {
                        return Err(BackendError::alias(format!("No such index: {}", to)));
                    }
                    let targets = aliases.get_mut(alias).ok_or_else(|| {
                        BackendError::alias(format!("No such alias: {}", alias))
                    })?;
                    let filter = targets.remove(from).ok_or_else(|| {
                        BackendError::alias(format!("Alias {} is not on {}", alias, from))
                    })?;
                    targets.insert(to.clone(), filter);
                }
            }
        }
        aliases.retain(|_, targets| !targets.is_empty());
        state.aliases = aliases;
        Ok(())
    }

    async fn extend_alias_filter(&self, alias: &str, clause: &Query) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let Some(targets) = state.aliases.get_mut(alias) else {
            return Ok(());
        };
        for filter in targets.values_mut() {
            let Some(current) = filter.take() else {
                continue;
            };
            let extended = match current {
                Query::Bool(mut b) if !b.should.is_empty() => {
                    b.should.push(clause.clone());
                    Query::Bool(b)
                }
                other => Query::Bool(BoolQuery::new().should(other).should(clause.clone())),
            };
            *filter = Some(extended);
        }
        Ok(())
    }
}
