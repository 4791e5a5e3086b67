use std::collections::HashMap;

use crate::types::{RunId, RunState};

/// Latest snapshot per run identifier.
///
/// Not synchronized on its own; [`super::RunRegistry`] owns the lock.
#[derive(Debug, Default)]
pub(crate) struct StateStore {
    snapshots: HashMap<RunId, RunState>,
}

impl StateStore {
    pub fn get(&self, run_id: &RunId) -> Option<&RunState> {
        self.snapshots.get(run_id)
    }

    /// First snapshot stored under any of `ids`.
    pub fn first_of(&self, ids: &[RunId]) -> Option<&RunState> {
        ids.iter().find_map(|id| self.snapshots.get(id))
    }

    /// Store `snapshot` under every id in `ids`, returning the written copies.
    pub fn write_all(&mut self, ids: &[RunId], snapshot: &RunState) -> Vec<RunState> {
        ids.iter()
            .map(|id| {
                let copy = snapshot.rekeyed(id);
                self.snapshots.insert(id.clone(), copy.clone());
                copy
            })
            .collect()
    }

    pub fn insert(&mut self, snapshot: RunState) {
        self.snapshots.insert(snapshot.run_id.clone(), snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_all_keys_each_copy_by_its_own_id() {
        let mut store = StateStore::default();
        let ids = [RunId::new("client"), RunId::new("engine")];
        let written = store.write_all(&ids, &RunState::preparing(RunId::new("client")));

        assert_eq!(written.len(), 2);
        assert_eq!(store.get(&ids[1]).map(|s| s.run_id.clone()), Some(ids[1].clone()));
        assert_eq!(store.first_of(&ids[1..]).map(|s| s.revision), Some(1));
        assert_eq!(store.len(), 2);
    }
}
