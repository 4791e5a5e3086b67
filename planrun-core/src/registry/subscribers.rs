use std::{fmt, sync::Arc};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::RunError,
    types::{RunId, RunState},
};

/// Outcome of one delivery attempt to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Already delivered this revision or a newer one.
    Stale,
    /// Subscriber buffer full; this snapshot is skipped for it.
    Dropped,
    /// Unsubscribed while the dispatch was in flight.
    Closed,
}

#[derive(Debug)]
struct DeliveryState {
    last_revision: Option<u64>,
    /// Dropped on close so the receiving side observes end of stream.
    sender: Option<mpsc::Sender<RunState>>,
}

/// A live push channel opened against one run id.
pub struct Subscription {
    id: Uuid,
    run_id: RunId,
    delivery: Mutex<DeliveryState>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(run_id: RunId, sender: mpsc::Sender<RunState>) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            delivery: Mutex::new(DeliveryState {
                last_revision: None,
                sender: Some(sender),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn is_closed(&self) -> bool {
        self.delivery
            .lock()
            .sender
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }

    /// Stop all further deliveries, including ones already dispatched
    /// against a cloned subscriber list, and end the receiver's stream.
    pub(crate) fn close(&self) {
        self.delivery.lock().sender = None;
    }

    /// Non-blocking delivery of `snapshot`, skipping anything not newer than
    /// what this subscriber already received.
    pub(crate) fn deliver(&self, snapshot: &RunState) -> Result<Delivery, RunError> {
        let mut state = self.delivery.lock();
        let Some(sender) = state.sender.as_ref() else {
            return Ok(Delivery::Closed);
        };
        if state
            .last_revision
            .is_some_and(|last| snapshot.revision <= last)
        {
            return Ok(Delivery::Stale);
        }

        match sender.try_send(snapshot.clone()) {
            Ok(()) => {
                state.last_revision = Some(snapshot.revision);
                Ok(Delivery::Sent)
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    subscription = %self.id,
                    run_id = %self.run_id,
                    revision = snapshot.revision,
                    "subscriber buffer full; snapshot skipped"
                );
                Ok(Delivery::Dropped)
            }
            Err(TrySendError::Closed(_)) => {
                state.sender = None;
                Err(RunError::NotificationDeliveryFailure {
                    subscription: self.id,
                })
            }
        }
    }
}

/// Per-dispatch delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub stale: usize,
    pub dropped: usize,
    pub removed: usize,
}

/// Live subscriptions keyed by the run id they were opened against.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    channels: DashMap<RunId, Vec<Arc<Subscription>>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("run_count", &self.channels.len())
            .field("subscription_count", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn register(&self, subscription: Arc<Subscription>) {
        self.channels
            .entry(subscription.run_id.clone())
            .or_default()
            .push(subscription);
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn remove(&self, run_id: &RunId, subscription_id: Uuid) -> bool {
        let removed = match self.channels.get_mut(run_id) {
            Some(mut subscriptions) => {
                let before = subscriptions.len();
                subscriptions.retain(|sub| {
                    if sub.id == subscription_id {
                        sub.close();
                        false
                    } else {
                        true
                    }
                });
                subscriptions.len() != before
            }
            None => false,
        };

        self.channels
            .remove_if(run_id, |_, subscriptions| subscriptions.is_empty());
        removed
    }

    /// Deliver `snapshot` to every subscription opened against `run_id`.
    pub fn dispatch(&self, run_id: &RunId, snapshot: &RunState) -> DispatchReport {
        let targets = match self.channels.get(run_id) {
            Some(subscriptions) => subscriptions.value().clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for subscription in targets {
            match subscription.deliver(snapshot) {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Stale) => report.stale += 1,
                Ok(Delivery::Dropped) => report.dropped += 1,
                Ok(Delivery::Closed) => {
                    self.remove(run_id, subscription.id);
                }
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "removing subscriber");
                    if self.remove(run_id, subscription.id) {
                        report.removed += 1;
                    }
                }
            }
        }

        if report.sent > 0 || report.removed > 0 {
            debug!(
                run_id = %run_id,
                revision = snapshot.revision,
                sent = report.sent,
                removed = report.removed,
                "dispatched snapshot"
            );
        }
        report
    }

    /// Close and forget every subscription. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.channels.retain(|_, subscriptions| {
            for subscription in subscriptions.iter() {
                subscription.close();
                closed += 1;
            }
            false
        });
        closed
    }

    pub fn len(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(revision: u64) -> RunState {
        RunState {
            revision,
            ..RunState::preparing(RunId::new("run"))
        }
    }

    #[tokio::test]
    async fn older_revisions_are_never_redelivered() {
        let registry = SubscriberRegistry::default();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(Arc::new(Subscription::new(RunId::new("run"), tx)));

        let run = RunId::new("run");
        assert_eq!(registry.dispatch(&run, &snapshot(2)).sent, 1);
        assert_eq!(registry.dispatch(&run, &snapshot(2)).stale, 1);
        assert_eq!(registry.dispatch(&run, &snapshot(1)).stale, 1);
        assert_eq!(registry.dispatch(&run, &snapshot(3)).sent, 1);

        assert_eq!(rx.recv().await.map(|s| s.revision), Some(2));
        assert_eq!(rx.recv().await.map(|s| s.revision), Some(3));
    }

    #[tokio::test]
    async fn closed_channel_is_removed_without_affecting_others() {
        let registry = SubscriberRegistry::default();
        let run = RunId::new("run");
        let (dead_tx, dead_rx) = mpsc::channel(8);
        let (live_tx, mut live_rx) = mpsc::channel(8);
        registry.register(Arc::new(Subscription::new(run.clone(), dead_tx)));
        registry.register(Arc::new(Subscription::new(run.clone(), live_tx)));
        drop(dead_rx);

        let report = registry.dispatch(&run, &snapshot(1));
        assert_eq!(report.sent, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len(), 1);

        let report = registry.dispatch(&run, &snapshot(2));
        assert_eq!(report, DispatchReport { sent: 1, ..Default::default() });
        assert!(live_rx.recv().await.is_some());
    }

    #[test]
    fn full_buffer_skips_the_snapshot_but_keeps_the_subscriber() {
        let registry = SubscriberRegistry::default();
        let run = RunId::new("run");
        let (tx, _rx) = mpsc::channel(1);
        registry.register(Arc::new(Subscription::new(run.clone(), tx)));

        assert_eq!(registry.dispatch(&run, &snapshot(1)).sent, 1);
        assert_eq!(registry.dispatch(&run, &snapshot(2)).dropped, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_is_idempotent_and_stops_delivery() {
        let registry = SubscriberRegistry::default();
        let run = RunId::new("run");
        let (tx, _rx) = mpsc::channel(8);
        let subscription = Arc::new(Subscription::new(run.clone(), tx));
        registry.register(subscription.clone());

        assert!(registry.remove(&run, subscription.id()));
        assert!(!registry.remove(&run, subscription.id()));
        assert!(subscription.is_closed());
        assert_eq!(subscription.deliver(&snapshot(1)), Ok(Delivery::Closed));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn close_all_ends_every_receiver_stream() {
        let registry = SubscriberRegistry::default();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(Arc::new(Subscription::new(RunId::new("run"), tx)));

        assert_eq!(registry.close_all(), 1);
        assert_eq!(registry.len(), 0);
        assert!(rx.recv().await.is_none());
    }
}
