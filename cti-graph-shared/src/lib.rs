//! # CTI Graph Shared
//!
//! This crate defines the entity model shared across the CTI graph store: typed
//! identifiers, the closed vocabulary of node kinds, entity records and the
//! well-known marking definitions every deployment agrees on.

pub mod error;
pub mod types;

pub use error::ModelError;
pub use types::entity::Entity;
pub use types::entity_type::EntityType;
pub use types::marking;
pub use types::stix_id::StixId;
