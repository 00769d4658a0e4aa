//! Graph expansion engine.

mod engine;
mod walker;

pub use engine::{ExpandRequest, ExpansionEngine, ExpansionOutput};
pub(crate) use walker::not_revoked;
pub use walker::{MoleculeWalker, EDGE_REFERENCE_FIELDS};
