//! OpenSearch index configuration.
//!
//! This module defines the index settings shared by every per-type entity index,
//! including the analyzer that splits reference values on the type-prefix
//! delimiter, and the dated naming scheme of physical indices.

use chrono::NaiveDate;
use serde_json::{json, Value};

/// Name of the analyzer applied to the `type` subfield of reference fields.
pub const REF_TYPE_ANALYZER: &str = "ref_type";

/// Separator between an alias and the date stamp of its physical index.
pub const INDEX_DATE_SEPARATOR: &str = "--";

/// Shard and replica settings for newly created indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Number of primary shards per index.
    pub number_of_shards: u32,
    /// Number of replicas per shard.
    pub number_of_replicas: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            number_of_replicas: 1,
        }
    }
}

impl IndexConfig {
    /// Create a new index configuration.
    ///
    /// # Arguments
    ///
    /// * `number_of_shards` - Primary shards per index
    /// * `number_of_replicas` - Replicas per shard
    pub fn new(number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            number_of_shards,
            number_of_replicas,
        }
    }

    /// Build the full index creation body for a set of field mappings.
    ///
    /// # Arguments
    ///
    /// * `mappings` - The `{"properties": ...}` mapping object
    ///
    /// # Returns
    ///
    /// A body with `settings` (shards, replicas, reference analyzer) and `mappings`.
    pub fn index_body(&self, mappings: &Value) -> Value {
        json!({
            "settings": {
                "number_of_shards": self.number_of_shards,
                "number_of_replicas": self.number_of_replicas,
                "analysis": {
                    "analyzer": {
                        REF_TYPE_ANALYZER: {
                            "type": "pattern",
                            "pattern": "--",
                            "lowercase": true
                        }
                    }
                }
            },
            "mappings": mappings
        })
    }
}

/// Get the dated physical index name for an alias.
///
/// # Arguments
///
/// * `alias` - The logical index name (e.g. `indicator`)
/// * `date` - The day the index is created
///
/// # Returns
///
/// The physical index name (e.g. `indicator--20240131`)
pub fn dated_index_name(alias: &str, date: NaiveDate) -> String {
    format!("{}{}{}", alias, INDEX_DATE_SEPARATOR, date.format("%Y%m%d"))
}
