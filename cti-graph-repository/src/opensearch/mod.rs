//! OpenSearch implementation of the search backend.
//!
//! This module provides a concrete implementation of `SearchBackend`
//! using OpenSearch as the backend.

mod index_config;
mod provider;

pub use index_config::{dated_index_name, IndexConfig, INDEX_DATE_SEPARATOR, REF_TYPE_ANALYZER};
pub use provider::OpenSearchProvider;
