//! Molecule schema registry.
//!
//! A molecule is a named graph pattern expressed as a flat table of
//! (source type, relationship type, target type) rules. Molecules bound the
//! graph expansion engine and provide the organisation walk the visibility
//! engine relies on.

mod definition;
pub mod registry;
mod rule;

pub use definition::Molecule;
pub use registry::MoleculeRegistry;
pub use rule::MoleculeRule;
