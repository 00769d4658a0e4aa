//! Configuration and dependency initialization.

mod dependencies;
mod engine;

pub use dependencies::{BackendKind, ConnectionMode, Dependencies};
pub use engine::{EngineConfig, DEFAULT_MAX_STALLED_ROUNDS, DEFAULT_SEARCH_SIZE};
