//! Bounded fan-out queue and its single dispatcher task.
//!
//! Producers (engine hooks on blocking threads, the orchestrator) enqueue
//! with `try_send` and never wait. One dispatcher task drains the queue in
//! arrival order and hands each snapshot to the subscriber registry.
//! Delivery is best effort; the registry snapshot stays authoritative.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::RunError,
    registry::RunRegistry,
    types::{RunId, RunState},
};

/// Snapshot queued for delivery to the subscribers of `run_id`.
#[derive(Debug, Clone)]
pub struct Notification {
    pub run_id: RunId,
    pub snapshot: RunState,
}

#[derive(Debug, Default)]
pub struct FanoutStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
}

impl FanoutStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Producer handle of the fan-out queue. Cheap to clone.
#[derive(Clone)]
pub struct FanoutQueue {
    tx: mpsc::Sender<Notification>,
    stats: Arc<FanoutStats>,
}

impl fmt::Debug for FanoutQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutQueue")
            .field("pending", &self.pending())
            .field("capacity", &self.tx.max_capacity())
            .field("stats", &self.stats)
            .finish()
    }
}

impl FanoutQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            stats: Arc::new(FanoutStats::default()),
        };
        (queue, rx)
    }

    /// Queue `snapshot` for the subscribers of its own run id without
    /// blocking.
    pub fn enqueue(&self, snapshot: RunState) -> Result<(), RunError> {
        let run_id = snapshot.run_id.clone();
        match self.tx.try_send(Notification {
            run_id: run_id.clone(),
            snapshot,
        }) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RunError::QueueSaturation { run_id })
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RunError::FanoutClosed { run_id })
            }
        }
    }

    /// Queue every snapshot, logging and dropping the ones that do not fit.
    /// Returns how many were queued.
    pub fn publish_all(&self, snapshots: Vec<RunState>) -> usize {
        let mut queued = 0;
        for snapshot in snapshots {
            match self.enqueue(snapshot) {
                Ok(()) => queued += 1,
                Err(err) => warn!(error = %err, "notification dropped"),
            }
        }
        queued
    }

    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn stats(&self) -> Arc<FanoutStats> {
        Arc::clone(&self.stats)
    }
}

/// Handle to the single fan-out consumer task.
pub struct FanoutDispatcher {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl fmt::Debug for FanoutDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutDispatcher")
            .field("finished", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

impl FanoutDispatcher {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(
        rx: mpsc::Receiver<Notification>,
        registry: Arc<RunRegistry>,
        stats: Arc<FanoutStats>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let task = DispatcherTask {
                rx,
                registry,
                stats,
                shutdown_rx,
            };
            task.run().await;
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the dispatcher after delivering whatever is already queued.
    pub async fn shutdown(self) {
        self.trigger_shutdown();
        if let Err(err) = self.handle.await {
            error!(?err, "fan-out dispatcher task panicked");
        }
    }
}

struct DispatcherTask {
    rx: mpsc::Receiver<Notification>,
    registry: Arc<RunRegistry>,
    stats: Arc<FanoutStats>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DispatcherTask {
    async fn run(mut self) {
        info!("starting fan-out dispatcher");

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                message = self.rx.recv() => match message {
                    Some(notification) => self.dispatch(notification),
                    None => {
                        debug!("all fan-out producers dropped");
                        return;
                    }
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Ok(notification) = self.rx.try_recv() {
            self.dispatch(notification);
            drained += 1;
        }
        info!(drained, "fan-out dispatcher stopped");
    }

    fn dispatch(&self, notification: Notification) {
        self.registry
            .dispatch(&notification.run_id, &notification.snapshot);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }
}
