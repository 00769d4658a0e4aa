//! # CTI Graph
//!
//! Multi-tenant cyber-threat-intelligence knowledge graph on top of a document
//! search backend.
//!
//! ## Architecture
//!
//! Entities live in per-type indices reached through aliases. On top of them:
//!
//! 1. **Expansion**: walks named graph patterns ("molecules") from seed ids
//! 2. **Visibility**: materializes what each caller may see as a filtered,
//!    day-sliced alias
//! 3. **Commit validation**: accepts a batch only as one attributable grouping
//! 4. **Mapping sync**: keeps index mappings in line with the property schemas
//!
//! ## Modules
//!
//! - [`client`]: The caller-facing facade
//! - [`expansion`]: Molecule walk and object fetch
//! - [`visibility`]: Views and marking management
//! - [`commit`]: Commit validation and storage
//! - [`mapping`]: Property schemas, generated mappings, index migration
//! - [`molecule`]: Molecule definitions and registry
//! - [`store`]: Entity persistence with up-versioning
//! - [`bootstrap`]: System identity and core markings
//! - [`ingest`]: Feed processors and commit assembly
//! - [`config`]: Configuration and dependency initialization
//! - [`errors`]: Error types

pub mod bootstrap;
pub mod client;
pub mod commit;
pub mod config;
pub mod errors;
pub mod expansion;
pub mod ingest;
pub mod mapping;
pub mod molecule;
pub mod store;
pub mod visibility;

pub use client::IntelClient;
pub use config::Dependencies;
pub use errors::{CommitError, CommitRejection, ExpandError, IngestError, MarkingError};

use cti_graph_repository::BackendError;
use thiserror::Error;

/// Errors that can occur during start-up.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend error.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Commit error while loading a feed.
    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

impl SetupError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
