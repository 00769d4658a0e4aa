//! Schema-to-mapping generation and index synchronization.

mod generator;
mod schema;
mod sync;

pub use generator::mapping_covers;
pub use schema::{PropertyKind, PropertySchema, PropertySchemas};
pub use sync::{MappingSync, SyncOutcome, SyncReport};

/// Alias spanning every entity type's index.
pub const INTEL_ALIAS: &str = "intel";

/// Alias spanning the indices of domain objects.
pub const SDO_ALIAS: &str = "sdo";
