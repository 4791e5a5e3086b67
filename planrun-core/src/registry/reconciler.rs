use std::collections::HashMap;

use crate::types::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MappingOutcome {
    New,
    Existing,
    /// One side is already mapped to a different id; the mapping is kept.
    Conflict,
}

/// Bidirectional client id <-> engine id association.
///
/// Mappings are never evicted, so an engine id stays queryable for the
/// lifetime of the process.
#[derive(Debug, Default)]
pub(crate) struct IdReconciler {
    client_to_engine: HashMap<RunId, RunId>,
    engine_to_client: HashMap<RunId, RunId>,
}

impl IdReconciler {
    pub fn record(&mut self, client: &RunId, engine: &RunId) -> MappingOutcome {
        match (
            self.client_to_engine.get(client),
            self.engine_to_client.get(engine),
        ) {
            (Some(mapped), Some(_)) if mapped == engine => MappingOutcome::Existing,
            (None, None) => {
                self.client_to_engine.insert(client.clone(), engine.clone());
                self.engine_to_client.insert(engine.clone(), client.clone());
                MappingOutcome::New
            }
            _ => MappingOutcome::Conflict,
        }
    }

    pub fn counterpart(&self, id: &RunId) -> Option<&RunId> {
        self.client_to_engine
            .get(id)
            .or_else(|| self.engine_to_client.get(id))
    }

    /// `id` itself followed by its counterpart, if mapped.
    pub fn resolve(&self, id: &RunId) -> Vec<RunId> {
        let mut ids = vec![id.clone()];
        if let Some(other) = self.counterpart(id) {
            ids.push(other.clone());
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.client_to_engine.len()
    }
}
