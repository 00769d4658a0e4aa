//! Entity storage on top of the search backend.

mod entity_store;

pub use entity_store::{EntityStore, IndexOutcome, DERIVED_FROM};
