//! Authoritative run state, identifier reconciliation, and subscribers.
//!
//! [`RunRegistry`] is the only component that touches the state store and
//! the id mapping. Both live behind a single lock so that resolving ids and
//! writing every id-keyed copy of a run is one atomic step. Subscribers live
//! in a separate concurrent map since dispatch never needs the state lock.

pub(crate) mod reconciler;
pub(crate) mod store;
pub mod subscribers;

use std::{fmt, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    serialize::SerializedValue,
    types::{RunId, RunState, StepOutputRecord},
};

use reconciler::{IdReconciler, MappingOutcome};
use store::StateStore;
use subscribers::{DispatchReport, SubscriberRegistry, Subscription};

#[derive(Debug, Default)]
struct RegistryInner {
    store: StateStore,
    ids: IdReconciler,
}

impl RegistryInner {
    /// Apply `mutate` to the current snapshot of the run `id` belongs to and
    /// write the result under every id of that run.
    ///
    /// Terminal snapshots are immutable: the write is skipped and nothing is
    /// returned.
    fn transition(
        &mut self,
        id: &RunId,
        create: impl FnOnce() -> Option<RunState>,
        mutate: impl FnOnce(&mut RunState),
    ) -> Vec<RunState> {
        let ids = self.ids.resolve(id);
        let Some(mut next) = self.store.first_of(&ids).cloned().or_else(create) else {
            return Vec::new();
        };
        if next.is_terminal() {
            debug!(run_id = %id, phase = %next.phase, "run is terminal; write ignored");
            return Vec::new();
        }

        mutate(&mut next);
        next.revision += 1;
        next.updated_at = Utc::now();
        self.store.write_all(&ids, &next)
    }
}

/// Shared run state for every in-flight and finished run.
///
/// Every mutating operation returns the snapshots it wrote, one per run id,
/// so the caller can publish exactly those. An empty result means nothing
/// changed.
#[derive(Default)]
pub struct RunRegistry {
    inner: Mutex<RegistryInner>,
    subscribers: SubscriberRegistry,
}

impl fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRegistry")
            .field("run_count", &self.run_count())
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the initial snapshot of a newly allocated run.
    pub fn seed(&self, snapshot: RunState) {
        self.inner.lock().store.insert(snapshot);
    }

    /// Latest snapshot of the run `id` refers to, keyed by `id`.
    pub fn get(&self, id: &RunId) -> Option<RunState> {
        let inner = self.inner.lock();
        let ids = inner.ids.resolve(id);
        inner.store.first_of(&ids).map(|snapshot| snapshot.rekeyed(id))
    }

    /// Like [`RunRegistry::get`], but an unknown id yields a `NOT_FOUND`
    /// snapshot.
    pub fn lookup(&self, id: &RunId) -> RunState {
        self.get(id)
            .unwrap_or_else(|| RunState::not_found(id.clone()))
    }

    /// Every id currently known to refer to the same run as `id`, starting
    /// with `id` itself.
    pub fn resolve_canonical_ids(&self, id: &RunId) -> Vec<RunId> {
        self.inner.lock().ids.resolve(id)
    }

    /// Merge a completed step reported under `engine_id`.
    ///
    /// Creates the snapshot on the first event for an unmapped engine id.
    /// With `final_output` set the run completes at `step_index`.
    pub fn apply_step(
        &self,
        engine_id: &RunId,
        record: StepOutputRecord,
        final_output: Option<SerializedValue>,
    ) -> Vec<RunState> {
        let step_index = record.step_index;
        self.inner.lock().transition(
            engine_id,
            || Some(RunState::started_by_engine(engine_id.clone())),
            |state| {
                if state.engine_run_id.is_none() {
                    state.engine_run_id = Some(engine_id.clone());
                }
                state.record_step(record);
                match final_output {
                    Some(output) => state.complete(step_index as i64, output),
                    None => state.advance_to(step_index),
                }
            },
        )
    }

    /// Associate a client id with the engine id of the same run.
    ///
    /// The two copies are merged and the result written under both ids.
    /// Recording the same pair again is a no-op.
    pub fn record_mapping(&self, client_id: &RunId, engine_id: &RunId) -> Vec<RunState> {
        let mut inner = self.inner.lock();
        match inner.ids.record(client_id, engine_id) {
            MappingOutcome::New => {}
            MappingOutcome::Existing => return Vec::new(),
            MappingOutcome::Conflict => {
                warn!(
                    client_id = %client_id,
                    engine_id = %engine_id,
                    "conflicting id mapping ignored"
                );
                return Vec::new();
            }
        }

        let client = inner.store.get(client_id).cloned();
        let engine = inner.store.get(engine_id).cloned();
        let mut merged = match (client, engine) {
            (Some(client), Some(engine)) => client.reconcile(engine),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return Vec::new(),
        };
        merged.engine_run_id = Some(engine_id.clone());
        merged.revision += 1;
        merged.updated_at = Utc::now();

        debug!(
            client_id = %client_id,
            engine_id = %engine_id,
            phase = %merged.phase,
            "recorded id mapping"
        );
        inner
            .store
            .write_all(&[client_id.clone(), engine_id.clone()], &merged)
    }

    /// Force the run into `COMPLETE`.
    ///
    /// Without a `final_output` the collected step outputs become the final
    /// output.
    pub fn complete(
        &self,
        id: &RunId,
        step_index: i64,
        final_output: Option<SerializedValue>,
    ) -> Vec<RunState> {
        self.inner.lock().transition(
            id,
            || None,
            |state| {
                let output = final_output.unwrap_or_else(|| state.collected_outputs());
                state.complete(step_index, output);
            },
        )
    }

    /// Force the run into `FAILED`.
    pub fn fail(&self, id: &RunId, error: impl Into<String>) -> Vec<RunState> {
        let error = error.into();
        self.inner
            .lock()
            .transition(id, || None, |state| state.fail(error))
    }

    /// Register a push channel for `id` and immediately send the current
    /// snapshot, if any.
    ///
    /// The subscription is registered before the catch-up read, so no write
    /// that happens after this call can be missed; the revision check keeps
    /// the catch-up and a concurrent dispatch from delivering out of order.
    pub fn subscribe(&self, id: &RunId, sender: mpsc::Sender<RunState>) -> Arc<Subscription> {
        let subscription = Arc::new(Subscription::new(id.clone(), sender));
        self.subscribers.register(subscription.clone());

        if let Some(snapshot) = self.get(id)
            && let Err(err) = subscription.deliver(&snapshot)
        {
            warn!(run_id = %id, error = %err, "catch-up delivery failed");
            self.subscribers.remove(id, subscription.id());
        }
        subscription
    }

    /// Remove a subscription. Safe to call repeatedly.
    pub fn unsubscribe(&self, id: &RunId, subscription_id: Uuid) -> bool {
        self.subscribers.remove(id, subscription_id)
    }

    /// Push `snapshot` to the subscribers opened against `id`.
    pub fn dispatch(&self, id: &RunId, snapshot: &RunState) -> DispatchReport {
        self.subscribers.dispatch(id, snapshot)
    }

    /// End every open push channel. Used on shutdown.
    pub fn close_subscribers(&self) -> usize {
        self.subscribers.close_all()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of stored snapshots, one per known run id.
    pub fn run_count(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.inner.lock().ids.len()
    }
}
