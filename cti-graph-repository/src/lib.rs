//! # CTI Graph Repository
//!
//! This crate provides the search backend capability the graph store is built
//! on: a typed query DSL, the `SearchBackend` trait, and two implementations,
//! one backed by OpenSearch and one kept in memory.

pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod opensearch;
pub mod query;

pub use errors::BackendError;
pub use interfaces::{AliasAction, DocumentRef, SearchBackend};
pub use memory::InMemoryBackend;
pub use opensearch::OpenSearchProvider;
pub use query::{BoolQuery, Query};
