//! Feed ingestion: named line processors and commit assembly.

mod context;
mod processors;

pub use context::IngestContext;
pub use processors::{c2_masterlist, single_domain, single_hash, single_ip, single_url, Processor};

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::commit::COMMIT_CONTEXT;
use crate::errors::IngestError;
use cti_graph_shared::{Entity, StixId};

/// Processors addressable by output-type name.
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Processor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in processor.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("single_ip", single_ip);
        registry.register("single_domain", single_domain);
        registry.register("single_url", single_url);
        registry.register("single_hash", single_hash);
        registry.register("c2_masterlist", c2_masterlist);
        registry
    }

    pub fn register(&mut self, name: &str, processor: Processor) {
        self.processors.insert(name.to_string(), processor);
    }

    pub fn get(&self, name: &str) -> Option<Processor> {
        self.processors.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.keys().map(String::as_str).collect()
    }

    /// Run the named processor over every line of a feed.
    ///
    /// Lines that fail to parse are logged and skipped.
    ///
    /// # Returns
    ///
    /// * `Ok(entities)` - Everything produced, in feed order
    /// * `Err(IngestError::UnknownProcessor)` - If no processor has that name
    pub fn process<'a>(
        &self,
        name: &str,
        lines: impl IntoIterator<Item = &'a str>,
        ctx: &mut IngestContext,
    ) -> Result<Vec<Entity>, IngestError> {
        let processor = self
            .get(name)
            .ok_or_else(|| IngestError::UnknownProcessor(name.to_string()))?;

        let mut entities = Vec::new();
        let mut skipped = 0usize;
        for (number, line) in lines.into_iter().enumerate() {
            match processor(line, ctx) {
                Ok(produced) => entities.extend(produced),
                Err(e) => {
                    skipped += 1;
                    warn!(processor = name, line = number + 1, error = %e, "Skipping feed line");
                }
            }
        }
        debug!(processor = name, produced = entities.len(), skipped, "Feed processed");
        Ok(entities)
    }
}

/// Wrap `entities` in a commit: one grouping, authored and marked like the
/// rest of the request, declaring every entity as a member.
pub fn build_commit(ctx: &IngestContext, mut entities: Vec<Entity>) -> Vec<Entity> {
    let members: Vec<StixId> = entities.iter().map(|e| e.id.clone()).collect();
    let grouping = ctx.attribute(Entity::grouping(COMMIT_CONTEXT, &members));
    entities.push(grouping);
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::check_structure;
    use cti_graph_shared::EntityType;

    fn ctx() -> IngestContext {
        IngestContext::new(StixId::generate(EntityType::Identity), Vec::new())
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            ProcessorRegistry::builtin().names(),
            vec!["c2_masterlist", "single_domain", "single_hash", "single_ip", "single_url"]
        );
    }

    #[test]
    fn test_unknown_processor() {
        let result = ProcessorRegistry::builtin().process("rss", ["x"], &mut ctx());
        assert!(matches!(result, Err(IngestError::UnknownProcessor(_))));
    }

    #[test]
    fn test_process_skips_bad_lines() {
        let mut ctx = ctx();
        let entities = ProcessorRegistry::builtin()
            .process("single_ip", ["10.0.0.1", "garbage", "", "10.0.0.2"], &mut ctx)
            .unwrap();
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn test_build_commit_is_well_formed() {
        let mut ctx = ctx();
        let entities = ProcessorRegistry::builtin()
            .process("single_domain", ["a.example.com", "b.example.com"], &mut ctx)
            .unwrap();
        let commit = build_commit(&ctx, entities);
        assert_eq!(commit.len(), 3);
        let grouping = check_structure(&commit).unwrap();
        assert_eq!(grouping.created_by_ref.as_ref(), Some(ctx.author()));
    }
}
