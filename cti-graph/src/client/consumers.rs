//! Incident and event views built on molecule expansion.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use crate::client::{IntelClient, SearchRequest};
use crate::errors::ExpandError;
use crate::expansion::{ExpandRequest, ExpansionOutput};
use crate::molecule::registry::{EVENT, INCIDENT, ORG, PHASE};
use cti_graph_repository::Query;
use cti_graph_shared::{Entity, EntityType, StixId};

/// Attack-pattern field naming the identity an incident is assigned to.
pub const ASSIGNED_TO_FIELD: &str = "x_assigned_to_ref";

/// Which incidents to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// Incidents assigned to the caller.
    Assigned,
    /// Incidents targeting an organisation in the caller's chart.
    MyOrg,
    /// Every assigned incident.
    Global,
}

/// An incident molecule with the phase molecules hanging off it.
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub seed: StixId,
    pub objects: Vec<Entity>,
    pub phases: Vec<Vec<Entity>>,
}

impl IntelClient {
    /// Incidents visible to `caller` for the given focus.
    ///
    /// Seeds with no incident molecule, or whose molecule the caller can see
    /// less than two entities of, are left out.
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn get_incidents(
        &self,
        caller: &StixId,
        focus: Focus,
    ) -> Result<Vec<Incident>, ExpandError> {
        let seeds = match focus {
            Focus::Assigned => {
                self.incident_seeds(caller, Query::term(ASSIGNED_TO_FIELD, caller.as_str()))
                    .await?
            }
            Focus::Global => {
                self.incident_seeds(caller, Query::exists(ASSIGNED_TO_FIELD))
                    .await?
            }
            Focus::MyOrg => self.targeted_seeds(caller).await?,
        };

        let mut incidents = Vec::new();
        for seed in seeds {
            let Some(objects) = self.molecule_objects(caller, &seed, INCIDENT).await? else {
                continue;
            };
            if objects.len() < 2 {
                continue;
            }

            let mut phases = Vec::new();
            for phase_of in objects
                .iter()
                .filter(|o| o.relationship_type() == Some("phase-of"))
            {
                let Some(phase_seed) = phase_of.source_ref() else {
                    continue;
                };
                if let Some(phase) = self.molecule_objects(caller, &phase_seed, PHASE).await? {
                    phases.push(phase);
                }
            }
            incidents.push(Incident {
                seed,
                objects,
                phases,
            });
        }

        info!(incidents = incidents.len(), "Incidents collected");
        Ok(incidents)
    }

    /// Event molecules seeded by observed data authored within the caller's
    /// organisation chart.
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn get_events(&self, caller: &StixId) -> Result<Vec<Vec<Entity>>, ExpandError> {
        let chart = match self.walker.walk(std::slice::from_ref(caller), ORG, true).await {
            Ok(ids) => ids,
            Err(e) if e.is_no_match() => vec![caller.clone()],
            Err(e) => return Err(e),
        };
        let authors: Vec<&str> = chart
            .iter()
            .filter(|id| id.is_type(EntityType::Identity))
            .map(StixId::as_str)
            .collect();

        let request = SearchRequest::new(Query::terms("created_by_ref", authors))
            .in_index(EntityType::ObservedData.as_str());
        let seeds: BTreeSet<StixId> = self
            .search(caller, &request)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();

        let mut events = Vec::new();
        for seed in seeds {
            if let Some(objects) = self.molecule_objects(caller, &seed, EVENT).await? {
                events.push(objects);
            }
        }
        info!(events = events.len(), "Events collected");
        Ok(events)
    }

    async fn incident_seeds(&self, caller: &StixId, query: Query) -> Result<Vec<StixId>, ExpandError> {
        let request = SearchRequest::new(query)
            .in_index(EntityType::AttackPattern.as_str())
            .within_molecule(INCIDENT);
        let seeds: BTreeSet<StixId> = self
            .search(caller, &request)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        Ok(seeds.into_iter().collect())
    }

    /// Sources of `targets` relationships aimed at organisations in the
    /// caller's chart.
    async fn targeted_seeds(&self, caller: &StixId) -> Result<Vec<StixId>, ExpandError> {
        let request = ExpandRequest::new(vec![caller.clone()], ORG)
            .pivot(true)
            .with_objects()
            .with_filter(Query::term("identity_class", "organization"));
        let organisations = match self.expand(caller, &request).await {
            Ok(output) => output.into_objects(),
            Err(e) if e.is_no_match() => {
                debug!("No organisations in the caller's chart");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        if organisations.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::all(vec![
            Query::term("relationship_type", "targets"),
            Query::terms("target_ref", organisations.iter().map(|o| o.id.as_str())),
        ]);
        let request = SearchRequest::new(query).in_index(EntityType::Relationship.as_str());
        let seeds: BTreeSet<StixId> = self
            .search(caller, &request)
            .await?
            .iter()
            .filter_map(Entity::source_ref)
            .collect();
        Ok(seeds.into_iter().collect())
    }

    /// Visible objects of one molecule, or `None` when the seed has none.
    async fn molecule_objects(
        &self,
        caller: &StixId,
        seed: &StixId,
        molecule: &str,
    ) -> Result<Option<Vec<Entity>>, ExpandError> {
        let request = ExpandRequest::new(vec![seed.clone()], molecule).with_objects();
        match self.expand(caller, &request).await {
            Ok(ExpansionOutput::Objects(objects)) => Ok(Some(objects)),
            Ok(ExpansionOutput::Ids(_)) => Ok(None),
            Err(e) if e.is_no_match() => {
                debug!(seed = %seed, molecule, "Seed has no molecule");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
