//! This module defines the core data structures used across the CTI graph store.
//! It re-exports the identifier, entity and entity-type definitions.

pub mod entity;
pub mod entity_type;
pub mod marking;
pub mod stix_id;

pub use entity::Entity;
pub use entity_type::EntityType;
pub use stix_id::StixId;
