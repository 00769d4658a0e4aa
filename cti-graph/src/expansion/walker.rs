//! Iterative molecule walk over relationship documents.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::errors::ExpandError;
use crate::molecule::{Molecule, MoleculeRegistry, MoleculeRule};
use crate::store::EntityStore;
use cti_graph_repository::Query;
use cti_graph_shared::{Entity, EntityType, StixId};

/// Reference fields that connect a relationship to the frontier.
///
/// Only relationship endpoints are edges. Other `*_ref` fields such as
/// `created_by_ref` or `object_marking_refs` are never followed, so authorship
/// and markings do not pull entities into a molecule.
pub const EDGE_REFERENCE_FIELDS: [&str; 2] = ["source_ref", "target_ref"];

/// Query excluding revoked documents.
pub(crate) fn not_revoked() -> Query {
    Query::not(Query::term("revoked", true))
}

/// Discovers the closed id set of a molecule from seed ids.
///
/// Walks query the relationship index directly: intermediate rounds see every
/// stored relationship regardless of the caller's markings, and visibility is
/// applied only when objects are finally fetched.
#[derive(Clone)]
pub struct MoleculeWalker {
    store: EntityStore,
    registry: Arc<MoleculeRegistry>,
    config: EngineConfig,
}

impl MoleculeWalker {
    pub fn new(store: EntityStore, registry: Arc<MoleculeRegistry>, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<MoleculeRegistry> {
        &self.registry
    }

    /// Walk a molecule from `seeds` and return the closed id set, sorted.
    ///
    /// In pivot mode every rule is queried every round and the walk runs until
    /// the frontier stops growing. Otherwise each core rule is queried until
    /// it first produces a hit; the walk succeeds once the frontier stops
    /// growing with every core rule matched, and fails with
    /// [`ExpandError::PartialMatch`] after more than
    /// [`EngineConfig::max_stalled_rounds`] consecutive rounds without growth
    /// while some core rule is still unmatched. The stall cap is a heuristic
    /// bound, not a completeness guarantee for arbitrarily shaped molecules.
    ///
    /// Extension rules never drive the walk. Once the core walk closes, they
    /// are matched once against the closed set and their relationships and
    /// endpoints are added to the result.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Ids to start from
    /// * `molecule_name` - Registered molecule to walk
    /// * `pivot` - Unbounded join instead of the schema-closed walk
    ///
    /// # Returns
    ///
    /// * `Ok(ids)` - Seeds plus every id discovered
    /// * `Err(ExpandError)` - Unknown molecule, no match, partial match or backend fault
    #[instrument(skip(self, seeds), fields(seeds = seeds.len()))]
    pub async fn walk(
        &self,
        seeds: &[StixId],
        molecule_name: &str,
        pivot: bool,
    ) -> Result<Vec<StixId>, ExpandError> {
        let molecule = self
            .registry
            .get(molecule_name)
            .ok_or_else(|| ExpandError::UnknownMolecule(molecule_name.to_string()))?;

        let seeds: BTreeSet<StixId> = seeds.iter().cloned().collect();
        if seeds.is_empty() {
            return Err(ExpandError::no_seed_match(molecule_name));
        }

        let mut frontier = if pivot {
            self.pivot_walk(molecule, &seeds).await?
        } else {
            self.closed_walk(molecule, &seeds).await?
        };

        if frontier == seeds {
            debug!("Only the seeds were found");
            return Err(ExpandError::no_seed_match(molecule_name));
        }

        if !pivot && !molecule.ext().is_empty() {
            let decorations = self.match_ext(molecule, &frontier).await?;
            frontier.extend(decorations);
        }

        info!(found = frontier.len(), "Molecule walk complete");
        Ok(frontier.into_iter().collect())
    }

    /// Unbounded join over every rule of the molecule.
    async fn pivot_walk(
        &self,
        molecule: &Molecule,
        seeds: &BTreeSet<StixId>,
    ) -> Result<BTreeSet<StixId>, ExpandError> {
        let rules: Vec<&MoleculeRule> = molecule.rules().collect();
        let any_rule = Query::any(rules.iter().map(|r| r.query()).collect());

        let mut frontier = seeds.clone();
        let mut matched = false;
        let mut round = 0u32;
        loop {
            round += 1;
            let before = frontier.len();
            let query = Query::all(vec![reach(&frontier), any_rule.clone(), not_revoked()]);
            let hits = self.store.search(EntityType::Relationship.as_str(), &query).await?;
            for hit in hits.iter().filter(|e| molecule.admits(e)) {
                matched = true;
                absorb(&mut frontier, hit);
            }

            debug!(round, frontier = frontier.len(), "Pivot round complete");
            if !matched {
                return Err(ExpandError::no_seed_match(molecule.name()));
            }
            if frontier.len() == before {
                return Ok(frontier);
            }
        }
    }

    /// Schema-closed walk tracking which core rules have matched.
    async fn closed_walk(
        &self,
        molecule: &Molecule,
        seeds: &BTreeSet<StixId>,
    ) -> Result<BTreeSet<StixId>, ExpandError> {
        let core = molecule.core();
        let mut satisfied = vec![false; core.len()];
        let mut frontier = seeds.clone();
        let mut stalled = 0u32;
        let mut round = 0u32;

        loop {
            round += 1;
            let before = frontier.len();
            let touching = reach(&frontier);

            // Pending rules share no data within a round.
            let pending: Vec<usize> = (0..core.len()).filter(|&i| !satisfied[i]).collect();
            let results = try_join_all(
                pending
                    .iter()
                    .map(|&i| self.rule_hits(&core[i], &touching)),
            )
            .await?;

            for (&i, hits) in pending.iter().zip(results) {
                if !hits.is_empty() {
                    satisfied[i] = true;
                }
                for hit in &hits {
                    absorb(&mut frontier, hit);
                }
            }

            debug!(
                round,
                frontier = frontier.len(),
                satisfied = satisfied.iter().filter(|s| **s).count(),
                rules = core.len(),
                "Expansion round complete"
            );

            if !satisfied.iter().any(|s| *s) {
                return Err(ExpandError::no_seed_match(molecule.name()));
            }

            if frontier.len() > before {
                stalled = 0;
                continue;
            }
            if satisfied.iter().all(|s| *s) {
                return Ok(frontier);
            }

            stalled += 1;
            if stalled > self.config.max_stalled_rounds {
                let unsatisfied: Vec<String> = core
                    .iter()
                    .zip(&satisfied)
                    .filter(|(_, s)| !**s)
                    .map(|(r, _)| r.to_string())
                    .collect();
                warn!(round, unsatisfied = ?unsatisfied, "Partial molecule match");
                return Err(ExpandError::PartialMatch {
                    molecule: molecule.name().to_string(),
                    rounds: round,
                    unsatisfied,
                });
            }
        }
    }

    /// Relationships of every extension rule touching the closed set, with
    /// their endpoints.
    async fn match_ext(
        &self,
        molecule: &Molecule,
        closed: &BTreeSet<StixId>,
    ) -> Result<BTreeSet<StixId>, ExpandError> {
        let touching = reach(closed);
        let results = try_join_all(molecule.ext().iter().map(|r| self.rule_hits(r, &touching))).await?;
        let mut found = BTreeSet::new();
        for hit in results.iter().flatten() {
            absorb(&mut found, hit);
        }
        Ok(found)
    }

    /// Live relationships fitting `rule` that touch the frontier.
    async fn rule_hits(&self, rule: &MoleculeRule, touching: &Query) -> Result<Vec<Entity>, ExpandError> {
        let query = Query::all(vec![touching.clone(), rule.query(), not_revoked()]);
        let hits = self
            .store
            .search(EntityType::Relationship.as_str(), &query)
            .await?;
        Ok(hits.into_iter().filter(|e| rule.matches(e)).collect())
    }
}

/// Documents that are in the frontier or reference it through an edge field.
fn reach(frontier: &BTreeSet<StixId>) -> Query {
    let ids: Vec<&str> = frontier.iter().map(StixId::as_str).collect();
    Query::any(vec![
        Query::terms("id", ids.iter().copied()),
        Query::refers_to(EDGE_REFERENCE_FIELDS, ids.iter().copied()),
    ])
}

/// Add a hit and everything it references to the frontier. Authorship and
/// markings do not extend the walk.
fn absorb(frontier: &mut BTreeSet<StixId>, hit: &Entity) {
    frontier.insert(hit.id.clone());
    frontier.extend(hit.references());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::registry::{EVENT, INCIDENT, ORG};
    use cti_graph_repository::{InMemoryBackend, SearchBackend};

    fn id(s: &str) -> StixId {
        StixId::parse(s).unwrap()
    }

    async fn put(backend: &InMemoryBackend, entity: &Entity) {
        backend
            .index_document(entity.entity_type.as_str(), entity.id.key(), &entity.to_value(), false)
            .await
            .unwrap();
    }

    async fn walker_with(entities: &[Entity]) -> (MoleculeWalker, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        for entity in entities {
            put(&backend, entity).await;
        }
        let store = EntityStore::new(backend.clone(), EngineConfig::default());
        let walker = MoleculeWalker::new(
            store,
            Arc::new(MoleculeRegistry::builtin()),
            EngineConfig::default(),
        );
        (walker, backend)
    }

    #[tokio::test]
    async fn test_unknown_molecule() {
        let (walker, _) = walker_with(&[]).await;
        let result = walker.walk(&[id("indicator--1")], "nope", false).await;
        assert!(matches!(result, Err(ExpandError::UnknownMolecule(_))));
    }

    #[tokio::test]
    async fn test_seed_outside_molecule() {
        let rel = Entity::relationship(&id("indicator--1"), "based-on", &id("observed-data--2"));
        let (walker, _) = walker_with(&[rel]).await;
        let result = walker.walk(&[id("indicator--9")], EVENT, false).await;
        assert!(matches!(result, Err(ExpandError::NoSeedMatch { .. })));
    }

    #[tokio::test]
    async fn test_closed_walk_collects_endpoints_and_edges() {
        let rel = Entity::relationship(&id("indicator--1"), "based-on", &id("observed-data--2"));
        let (walker, _) = walker_with(&[rel.clone()]).await;
        let ids = walker.walk(&[id("indicator--1")], EVENT, false).await.unwrap();
        assert_eq!(
            ids,
            vec![id("indicator--1"), id("observed-data--2"), rel.id.clone()]
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_missing_core_rule_is_partial_match() {
        // Only the first of the three incident slots exists.
        let rel = Entity::relationship(&id("indicator--1"), "indicates", &id("attack-pattern--2"));
        let (walker, backend) = walker_with(&[rel]).await;
        let result = walker.walk(&[id("indicator--1")], INCIDENT, false).await;
        match result {
            Err(ExpandError::PartialMatch {
                rounds, unsatisfied, ..
            }) => {
                // One growing round, then four stalled ones.
                assert_eq!(rounds, 5);
                assert_eq!(unsatisfied.len(), 2);
            }
            other => panic!("expected a partial match, got {:?}", other),
        }
        // Satisfied rules are not re-queried.
        assert_eq!(backend.search_calls(), 3 + 4 * 2);
    }

    #[tokio::test]
    async fn test_revoked_relationships_are_ignored() {
        let mut rel = Entity::relationship(&id("indicator--1"), "based-on", &id("observed-data--2"));
        rel.revoked = true;
        let (walker, _) = walker_with(&[rel]).await;
        let result = walker.walk(&[id("indicator--1")], EVENT, false).await;
        assert!(matches!(result, Err(ExpandError::NoSeedMatch { .. })));
    }

    #[tokio::test]
    async fn test_pivot_walk_follows_chain() {
        let user = id("identity--user");
        let team = id("identity--team");
        let org = id("identity--org");
        let hq = id("location--hq");
        let a = Entity::relationship(&user, "member_of", &team);
        let b = Entity::relationship(&team, "member_of", &org);
        let c = Entity::relationship(&org, "located_at", &hq);
        let unrelated = Entity::relationship(&id("identity--x"), "member_of", &id("identity--y"));
        let (walker, _) = walker_with(&[a, b, c, unrelated]).await;

        let ids = walker.walk(&[user.clone()], ORG, true).await.unwrap();
        for expected in [&user, &team, &org, &hq] {
            assert!(ids.contains(expected), "missing {}", expected);
        }
        assert!(!ids.contains(&id("identity--x")));
        assert_eq!(ids.len(), 7);
    }

    #[tokio::test]
    async fn test_ext_hits_are_decorations() {
        let indicates = Entity::relationship(&id("indicator--1"), "indicates", &id("attack-pattern--2"));
        let based_on = Entity::relationship(&id("indicator--1"), "based-on", &id("observed-data--3"));
        let (walker, _) = walker_with(&[indicates.clone(), based_on.clone()]).await;

        let ids = walker.walk(&[id("indicator--1")], EVENT, false).await.unwrap();
        assert!(ids.contains(&based_on.id));
        assert!(ids.contains(&indicates.id));
        assert!(ids.contains(&id("attack-pattern--2")));

        // An extension rule alone does not make a molecule.
        let (walker, _) = walker_with(&[indicates]).await;
        let result = walker.walk(&[id("indicator--1")], EVENT, false).await;
        assert!(matches!(result, Err(ExpandError::NoSeedMatch { .. })));
    }
}
