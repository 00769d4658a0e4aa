//! Marking management: distribution markings and the open-markings registry.

use serde_json::Value;
use tracing::{info, instrument};

use crate::errors::MarkingError;
use crate::visibility::engine::VisibilityEngine;
use cti_graph_shared::marking::{distribution_marking, distribution_marking_id, Tlp};
use cti_graph_shared::{EntityType, StixId};

impl VisibilityEngine {
    /// Create a distribution-list (TLP+) marking and apply it to the existing
    /// views of every identity it names.
    ///
    /// Creation is idempotent: the id is derived from the name, the base and
    /// the set of distribution refs, and an existing marking is returned as is.
    ///
    /// # Arguments
    ///
    /// * `caller` - Identity authoring the marking
    /// * `name` - Free-text name of the distribution list
    /// * `tlp_base` - Id of the TLP marking the list refines; AMBER or RED
    /// * `distribution_refs` - Identities allowed to see marked entities
    ///
    /// # Returns
    ///
    /// * `Ok(id)` - The marking id
    /// * `Err(MarkingError)` - Invalid caller or base, or a backend fault
    #[instrument(skip(self, distribution_refs), fields(caller = %caller, refs = distribution_refs.len()))]
    pub async fn create_distribution_marking(
        &self,
        caller: &StixId,
        name: &str,
        tlp_base: &StixId,
        distribution_refs: &[StixId],
    ) -> Result<StixId, MarkingError> {
        if !caller.is_type(EntityType::Identity) {
            return Err(MarkingError::InvalidCaller(caller.to_string()));
        }
        let base = Tlp::from_id(tlp_base)
            .filter(Tlp::allows_distribution)
            .ok_or_else(|| MarkingError::InvalidTlpBase(tlp_base.to_string()))?;

        let id = distribution_marking_id(name, base, distribution_refs);
        if self.store().exists(&id).await? {
            info!(marking = %id, "Distribution marking already exists");
            return Ok(id);
        }

        let marking = distribution_marking(caller, name, base, distribution_refs);
        self.store()
            .index_entity(caller, &marking, false, true)
            .await?;
        self.update_distribution(&marking).await?;

        info!(marking = %id, "Distribution marking created");
        Ok(id)
    }

    /// Register `marking` as open: entities carrying it become visible to
    /// every caller once their views are rebuilt.
    ///
    /// The open-markings grouping is up-versioned with the marking appended.
    ///
    /// # Returns
    ///
    /// * `Ok(id)` - Id of the live open-markings grouping
    /// * `Err(MarkingError::MissingOpenMarkings)` - If core data was never stored
    pub async fn add_open_marking(
        &self,
        caller: &StixId,
        marking: &StixId,
    ) -> Result<StixId, MarkingError> {
        if !caller.is_type(EntityType::Identity) {
            return Err(MarkingError::InvalidCaller(caller.to_string()));
        }

        let mut groupings = self.open_markings_groupings().await?;
        groupings.sort_by(|a, b| b.modified.cmp(&a.modified));
        let Some(mut grouping) = groupings.into_iter().next() else {
            return Err(MarkingError::MissingOpenMarkings);
        };

        let mut members = grouping.object_refs();
        if members.contains(marking) {
            return Ok(grouping.id);
        }
        members.push(marking.clone());
        grouping.properties.insert(
            "object_refs".to_string(),
            Value::Array(members.iter().map(|m| Value::from(m.as_str())).collect()),
        );

        let outcome = self
            .store()
            .index_entity(caller, &grouping, true, true)
            .await?;
        info!(marking = %marking, grouping = %outcome.current(), "Open marking registered");
        Ok(outcome.current().clone())
    }
}
