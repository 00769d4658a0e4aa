//! Marking / visibility engine.
//!
//! Every caller reads through a filtered alias (a "view") over the entity
//! indices. Views are sliced by day: a caller's view is computed at most once
//! per slice unless a refresh is forced, and distribution markings created
//! through [`VisibilityEngine::create_distribution_marking`] are pushed into
//! the affected views immediately.

mod engine;
mod markings;
mod view;

pub use engine::VisibilityEngine;
pub use view::{view_root, ViewHandle};
