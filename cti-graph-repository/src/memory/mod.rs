//! In-process implementation of the search backend.
//!
//! Keeps indices, documents and filtered aliases in memory and evaluates
//! queries with [`crate::Query::matches`]. Used by tests and by deployments
//! that run without a search cluster.

mod backend;

pub use backend::InMemoryBackend;
