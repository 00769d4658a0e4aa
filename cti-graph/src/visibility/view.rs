//! Time-sliced view aliases.

use chrono::NaiveDate;

use cti_graph_shared::StixId;

/// Separator between the parts of a view alias name.
const VIEW_SEPARATOR: &str = "--";

/// A caller's filtered view over a base index or alias.
///
/// The alias name encodes the base, the caller key and the day slice:
/// `intel--<caller key>--20240131`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewHandle {
    alias: String,
    caller: StixId,
    slice: NaiveDate,
}

impl ViewHandle {
    pub fn new(base: &str, caller: &StixId, slice: NaiveDate) -> Self {
        Self {
            alias: format!(
                "{}{}{}",
                view_root(base, caller),
                VIEW_SEPARATOR,
                slice.format("%Y%m%d")
            ),
            caller: caller.clone(),
            slice,
        }
    }

    /// Name to search through.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn caller(&self) -> &StixId {
        &self.caller
    }

    pub fn slice(&self) -> NaiveDate {
        self.slice
    }
}

/// Prefix shared by every slice of a caller's view over `base`.
pub fn view_root(base: &str, caller: &StixId) -> String {
    format!("{}{}{}", base, VIEW_SEPARATOR, caller.key())
}

/// Returns true when `alias` is a view alias belonging to the identity with
/// the given key.
pub fn is_view_of(alias: &str, caller_key: &str) -> bool {
    let marker = format!("{}{}{}", VIEW_SEPARATOR, caller_key, VIEW_SEPARATOR);
    alias.contains(&marker)
}
