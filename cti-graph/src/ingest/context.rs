//! Request-scoped state shared by the processors of one feed run.

use std::collections::HashMap;

use cti_graph_shared::{Entity, EntityType, StixId};

/// Attribution and de-duplication state for one ingest request.
///
/// The library remembers every named entity created during the request so a
/// feed mentioning the same malware on many lines yields a single entity.
#[derive(Debug, Clone)]
pub struct IngestContext {
    author: StixId,
    markings: Vec<StixId>,
    library: HashMap<(EntityType, String), StixId>,
}

impl IngestContext {
    /// # Arguments
    ///
    /// * `author` - Identity every produced entity is attributed to
    /// * `markings` - Markings applied to every produced entity
    pub fn new(author: StixId, markings: Vec<StixId>) -> Self {
        Self {
            author,
            markings,
            library: HashMap::new(),
        }
    }

    pub fn author(&self) -> &StixId {
        &self.author
    }

    pub fn markings(&self) -> &[StixId] {
        &self.markings
    }

    /// Apply the request's author and markings to `entity`.
    pub fn attribute(&self, entity: Entity) -> Entity {
        let entity = entity.with_author(&self.author);
        if self.markings.is_empty() {
            entity
        } else {
            entity.with_markings(&self.markings)
        }
    }

    /// Return the id of the named entity created earlier in this request, or
    /// build it with `make`, push it to `out` and remember it.
    pub fn library_entity(
        &mut self,
        entity_type: EntityType,
        name: &str,
        out: &mut Vec<Entity>,
        make: impl FnOnce() -> Entity,
    ) -> StixId {
        let key = (entity_type, name.to_string());
        if let Some(id) = self.library.get(&key) {
            return id.clone();
        }
        let entity = self.attribute(make());
        let id = entity.id.clone();
        self.library.insert(key, id.clone());
        out.push(entity);
        id
    }

    pub fn library_len(&self) -> usize {
        self.library.len()
    }
}
