//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchBackend`
//! using the OpenSearch Rust crate.

use async_trait::async_trait;
use opensearch::{
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{
        IndicesCreateParts, IndicesExistsAliasParts, IndicesExistsParts, IndicesGetAliasParts,
        IndicesGetMappingParts,
    },
    params::Refresh,
    CountParts, ExistsParts, GetParts, IndexParts, MgetParts, OpenSearch, SearchParts,
    UpdateParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::errors::BackendError;
use crate::interfaces::{AliasAction, DocumentRef, SearchBackend};
use crate::opensearch::index_config::IndexConfig;
use crate::query::Query;

/// OpenSearch provider implementation.
///
/// # Example
///
/// ```ignore
/// use cti_graph_repository::opensearch::{IndexConfig, OpenSearchProvider};
/// use cti_graph_repository::{Query, SearchBackend};
///
/// let provider = OpenSearchProvider::new("http://localhost:9200", IndexConfig::default()).await?;
/// provider.ping().await?;
/// let hits = provider
///     .search("intel", &Query::term("type", "indicator"), 100)
///     .await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
    index_config: IndexConfig,
}

impl OpenSearchProvider {
    /// Create a new OpenSearch provider connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `index_config` - Shard and replica settings for indices created later
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A new provider instance
    /// * `Err(BackendError)` - If connection setup fails
    pub async fn new(url: &str, index_config: IndexConfig) -> Result<Self, BackendError> {
        let parsed_url = Url::parse(url).map_err(|e| BackendError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| BackendError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            shards = index_config.number_of_shards,
            replicas = index_config.number_of_replicas,
            "Created OpenSearch provider"
        );

        Ok(Self {
            client,
            index_config,
        })
    }

    /// Index settings applied by callers that create indices through this provider.
    pub fn index_config(&self) -> &IndexConfig {
        &self.index_config
    }

    /// Check that the cluster answers.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .ping()
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;
        if !response.status_code().is_success() {
            return Err(BackendError::connection(format!(
                "Ping failed with status {}",
                response.status_code()
            )));
        }
        Ok(())
    }

    /// Read a JSON response body, turning non-success statuses into errors.
    async fn json_body(
        response: Response,
        context: &str,
        to_error: impl Fn(String) -> BackendError,
    ) -> Result<Value, BackendError> {
        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, context = context, "Request failed");
            return Err(to_error(format!(
                "{} failed with status {}: {}",
                context, status, error_body
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::parse(e.to_string()))
    }

    /// Fail on non-success statuses, discarding the body otherwise.
    async fn expect_success(
        response: Response,
        context: &str,
        to_error: impl Fn(String) -> BackendError,
    ) -> Result<(), BackendError> {
        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, context = context, "Request failed");
            return Err(to_error(format!(
                "{} failed with status {}: {}",
                context, status, error_body
            )));
        }
        Ok(())
    }

    fn refresh(refresh: bool) -> Refresh {
        if refresh {
            Refresh::WaitFor
        } else {
            Refresh::False
        }
    }

    /// Fetch `{index: {"aliases": {name: {...}}}}` for an alias, or `None` when it
    /// does not exist.
    async fn alias_info(&self, alias: &str) -> Result<Option<Value>, BackendError> {
        let response = self
            .client
            .indices()
            .get_alias(IndicesGetAliasParts::Name(&[alias]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;
        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        Self::json_body(response, "Get alias", BackendError::alias)
            .await
            .map(Some)
    }

    /// Render one alias action. A retarget becomes a remove plus an add that
    /// carries `carried`, the filter the alias had on its source index.
    fn action_json(action: &AliasAction, carried: Option<&Value>) -> Vec<Value> {
        match action {
            AliasAction::Add {
                index,
                alias,
                filter: Some(filter),
            } => vec![json!({ "add": { "index": index, "alias": alias, "filter": filter.to_json() } })],
            AliasAction::Add {
                index,
                alias,
                filter: None,
            } => vec![json!({ "add": { "index": index, "alias": alias } })],
            AliasAction::Remove { index, alias } => {
                vec![json!({ "remove": { "index": index, "alias": alias } })]
            }
            AliasAction::Retarget { alias, from, to } => {
                let add = match carried {
                    Some(filter) => json!({ "add": { "index": to, "alias": alias, "filter": filter } }),
                    None => json!({ "add": { "index": to, "alias": alias } }),
                };
                vec![json!({ "remove": { "index": from, "alias": alias } }), add]
            }
        }
    }

    /// The filter `alias` currently carries on `index`.
    async fn current_filter(&self, alias: &str, index: &str) -> Result<Option<Value>, BackendError> {
        let info = self.alias_info(alias).await?;
        let Some(entry) = info.as_ref().and_then(|i| i.get(index)) else {
            return Err(BackendError::alias(format!("Alias {} is not on {}", alias, index)));
        };
        Ok(entry["aliases"][alias].get("filter").cloned())
    }

    /// Append `clause` to an alias filter rendered as JSON.
    fn extend_filter_json(filter: &Value, clause: Value) -> Value {
        if let Some(should) = filter
            .get("bool")
            .and_then(|b| b.get("should"))
            .and_then(Value::as_array)
        {
            let mut extended = filter.clone();
            let mut should = should.clone();
            should.push(clause);
            extended["bool"]["should"] = Value::Array(should);
            return extended;
        }
        json!({ "bool": { "should": [filter, clause], "minimum_should_match": 1 } })
    }
}

#[async_trait]
impl SearchBackend for OpenSearchProvider {
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        refresh: bool,
    ) -> Result<(), BackendError> {
        let response = self
            .client
            .index(IndexParts::IndexId(index, id))
            .body(document)
            .refresh(Self::refresh(refresh))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Self::expect_success(response, "Index", BackendError::index).await?;
        debug!(index = %index, doc_id = %id, "Document indexed");
        Ok(())
    }

    async fn document_exists(&self, index: &str, id: &str) -> Result<bool, BackendError> {
        let response = self
            .client
            .exists(ExistsParts::IndexId(index, id))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(BackendError::search(format!(
                "Exists check failed with status {}",
                status
            ))),
        }
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
        refresh: bool,
    ) -> Result<(), BackendError> {
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(json!({ "doc": partial }))
            .refresh(Self::refresh(refresh))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Err(BackendError::document_not_found(index, id));
        }
        Self::expect_success(response, "Update", BackendError::update).await?;
        debug!(index = %index, doc_id = %id, "Document updated");
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, BackendError> {
        let response = self
            .client
            .get(GetParts::IndexId(index, id))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let body = Self::json_body(response, "Get", BackendError::search).await?;
        Ok(body.get("_source").cloned())
    }

    async fn multi_get(&self, docs: &[DocumentRef]) -> Result<Vec<Value>, BackendError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body: Vec<Value> = docs
            .iter()
            .map(|d| json!({ "_index": d.index, "_id": d.id }))
            .collect();

        let response = self
            .client
            .mget(MgetParts::None)
            .body(json!({ "docs": body }))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        let body = Self::json_body(response, "Multi-get", BackendError::search).await?;
        let found = body["docs"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|d| d["found"].as_bool().unwrap_or(false))
                    .filter_map(|d| d.get("_source").cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }

    async fn search(
        &self,
        index: &str,
        query: &Query,
        size: usize,
    ) -> Result<Vec<Value>, BackendError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .ignore_unavailable(true)
            .allow_no_indices(true)
            .body(json!({ "query": query.to_json(), "size": size }))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let body = Self::json_body(response, "Search", BackendError::search).await?;
        let hits = body["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|h| h.get("_source").cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    async fn count(&self, index: &str) -> Result<u64, BackendError> {
        let response = self
            .client
            .count(CountParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Ok(0);
        }
        let body = Self::json_body(response, "Count", BackendError::search).await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| BackendError::parse("Count response has no count"))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), BackendError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Self::expect_success(response, "Create index", BackendError::index_creation).await?;
        info!(index = %index, "Index created");
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Ok(response.status_code().is_success())
    }

    async fn get_mapping(&self, index: &str) -> Result<Option<Value>, BackendError> {
        let response = self
            .client
            .indices()
            .get_mapping(IndicesGetMappingParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let body = Self::json_body(response, "Get mapping", BackendError::mapping).await?;
        // An alias may resolve to several dated indices; the newest one is live.
        let latest = body.as_object().and_then(|indices| {
            indices
                .iter()
                .max_by(|a, b| a.0.cmp(b.0))
                .map(|(_, v)| v["mappings"].clone())
        });
        Ok(latest)
    }

    async fn reindex(&self, source: &str, dest: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .reindex()
            .wait_for_completion(true)
            .refresh(true)
            .body(json!({
                "source": { "index": source },
                "dest": { "index": dest }
            }))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Self::expect_success(response, "Reindex", BackendError::reindex).await?;
        info!(source = %source, dest = %dest, "Reindex complete");
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool, BackendError> {
        let response = self
            .client
            .indices()
            .exists_alias(IndicesExistsAliasParts::Name(&[alias]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Ok(response.status_code().is_success())
    }

    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, BackendError> {
        let mut indices: Vec<String> = match self.alias_info(alias).await? {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        indices.sort();
        Ok(indices)
    }

    async fn aliases_for_index(&self, index: &str) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .indices()
            .get_alias(IndicesGetAliasParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;
        if response.status_code().as_u16() == 404 {
            return Ok(Vec::new());
        }

        let body = Self::json_body(response, "Get index aliases", BackendError::alias).await?;
        let mut aliases: Vec<String> = body[index]["aliases"]
            .as_object()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default();
        aliases.sort();
        Ok(aliases)
    }

    async fn list_aliases(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .indices()
            .get_alias(IndicesGetAliasParts::None)
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        let body = Self::json_body(response, "List aliases", BackendError::alias).await?;
        let mut aliases: Vec<String> = body
            .as_object()
            .map(|indices| {
                indices
                    .values()
                    .filter_map(|v| v["aliases"].as_object())
                    .flat_map(|a| a.keys().cloned())
                    .collect()
            })
            .unwrap_or_default();
        aliases.sort();
        aliases.dedup();
        Ok(aliases)
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError> {
        if actions.is_empty() {
            return Ok(());
        }
        let mut rendered = Vec::with_capacity(actions.len());
        for action in actions {
            let carried = match action {
                AliasAction::Retarget { alias, from, .. } => self.current_filter(alias, from).await?,
                _ => None,
            };
            rendered.extend(Self::action_json(action, carried.as_ref()));
        }
        let actions = rendered;

        let response = self
            .client
            .indices()
            .update_aliases()
            .body(json!({ "actions": actions }))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Self::expect_success(response, "Update aliases", BackendError::alias).await?;
        debug!(actions = actions.len(), "Aliases updated");
        Ok(())
    }

    async fn extend_alias_filter(&self, alias: &str, clause: &Query) -> Result<(), BackendError> {
        let Some(Value::Object(indices)) = self.alias_info(alias).await? else {
            return Ok(());
        };

        let mut actions = Vec::new();
        for (index, info) in &indices {
            // Unfiltered aliases already expose everything.
            let Some(filter) = info["aliases"][alias].get("filter") else {
                continue;
            };
            let extended = Self::extend_filter_json(filter, clause.to_json());
            actions.push(json!({
                "add": { "index": index, "alias": alias, "filter": extended }
            }));
        }
        if actions.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .update_aliases()
            .body(json!({ "actions": actions }))
            .send()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        Self::expect_success(response, "Extend alias filter", BackendError::alias).await?;
        debug!(alias = %alias, "Alias filter extended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json() {
        let add = AliasAction::add_filtered("tool--20240101", "view", Query::exists("id"));
        assert_eq!(
            OpenSearchProvider::action_json(&add, None),
            vec![json!({"add": {
                "index": "tool--20240101",
                "alias": "view",
                "filter": {"exists": {"field": "id"}}
            }})]
        );

        let remove = AliasAction::remove("tool--20240101", "tool");
        assert_eq!(
            OpenSearchProvider::action_json(&remove, None),
            vec![json!({"remove": {"index": "tool--20240101", "alias": "tool"}})]
        );
    }

    #[test]
    fn test_retarget_json_carries_the_filter() {
        let retarget = AliasAction::retarget("intel--abc--20240101", "tool--20240101", "tool--20240102");
        let filter = json!({"bool": {"should": [{"exists": {"field": "a"}}], "minimum_should_match": 1}});
        let rendered = OpenSearchProvider::action_json(&retarget, Some(&filter));
        assert_eq!(
            rendered,
            vec![
                json!({"remove": {"index": "tool--20240101", "alias": "intel--abc--20240101"}}),
                json!({"add": {
                    "index": "tool--20240102",
                    "alias": "intel--abc--20240101",
                    "filter": filter
                }}),
            ]
        );
        let unfiltered = OpenSearchProvider::action_json(&retarget, None);
        assert_eq!(unfiltered[1], json!({"add": {"index": "tool--20240102", "alias": "intel--abc--20240101"}}));
    }

    #[test]
    fn test_extend_filter_appends_to_should() {
        let filter = json!({"bool": {"should": [{"exists": {"field": "a"}}], "minimum_should_match": 1}});
        let clause = json!({"term": {"b": 1}});
        let extended = OpenSearchProvider::extend_filter_json(&filter, clause.clone());
        assert_eq!(extended["bool"]["should"].as_array().unwrap().len(), 2);
        assert_eq!(extended["bool"]["should"][1], clause);
        assert_eq!(extended["bool"]["minimum_should_match"], 1);
    }

    #[test]
    fn test_extend_filter_wraps_plain_filter() {
        let filter = json!({"exists": {"field": "a"}});
        let clause = json!({"term": {"b": 1}});
        let extended = OpenSearchProvider::extend_filter_json(&filter, clause);
        assert_eq!(extended["bool"]["should"][0], filter);
    }

    #[test]
    fn test_refresh_policy() {
        assert!(matches!(OpenSearchProvider::refresh(true), Refresh::WaitFor));
        assert!(matches!(OpenSearchProvider::refresh(false), Refresh::False));
    }
}
