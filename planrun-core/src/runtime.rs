use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    config::SyncConfig,
    engine::{PlanEngine, StepObserver},
    fanout::{FanoutDispatcher, FanoutQueue},
    ingest::StepEventIngestor,
    orchestrator::{RunOrchestrator, StartedRun},
    registry::{RunRegistry, subscribers::Subscription},
    types::{PlanRequest, RunId, RunState},
};

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub active_runs: usize,
    pub tracked_run_ids: usize,
    pub mapped_runs: usize,
    pub subscribers: usize,
    pub queued_notifications: usize,
    pub notifications_enqueued: u64,
    pub notifications_dropped: u64,
    pub notifications_dispatched: u64,
}

/// Fully wired synchronization runtime: registry, fan-out dispatcher,
/// step ingestor, and orchestrator.
pub struct PlanRunRuntime {
    config: SyncConfig,
    registry: Arc<RunRegistry>,
    fanout: FanoutQueue,
    orchestrator: RunOrchestrator,
    dispatcher: Mutex<Option<FanoutDispatcher>>,
}

impl fmt::Debug for PlanRunRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanRunRuntime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl PlanRunRuntime {
    /// Build the runtime and spawn its dispatcher on the current tokio
    /// runtime.
    ///
    /// `build_engine` receives the step observer the engine must call after
    /// every completed step.
    pub fn start<F>(config: SyncConfig, build_engine: F) -> Self
    where
        F: FnOnce(Arc<dyn StepObserver>) -> Arc<dyn PlanEngine>,
    {
        let registry = Arc::new(RunRegistry::new());
        let (fanout, rx) = FanoutQueue::channel(config.queue_capacity);
        let dispatcher = FanoutDispatcher::start(rx, Arc::clone(&registry), fanout.stats());

        let observer: Arc<dyn StepObserver> = Arc::new(StepEventIngestor::new(
            Arc::clone(&registry),
            fanout.clone(),
            config.summary_preview_len,
        ));
        let engine = build_engine(observer);
        let orchestrator = RunOrchestrator::new(
            Arc::clone(&registry),
            fanout.clone(),
            engine,
            config.max_concurrent_runs,
        );

        info!(
            queue_capacity = config.queue_capacity,
            max_concurrent_runs = config.max_concurrent_runs,
            "plan run runtime started"
        );

        Self {
            config,
            registry,
            fanout,
            orchestrator,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn start_run(&self, request: &PlanRequest) -> StartedRun {
        self.orchestrator.start(request)
    }

    /// Current snapshot for `run_id`, `NOT_FOUND` if unknown.
    pub fn state(&self, run_id: &RunId) -> RunState {
        self.registry.lookup(run_id)
    }

    /// Open a push channel for `run_id`. The current snapshot, if any, is
    /// already waiting in the returned receiver.
    pub fn subscribe(&self, run_id: &RunId) -> (Arc<Subscription>, mpsc::Receiver<RunState>) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let subscription = self.registry.subscribe(run_id, tx);
        (subscription, rx)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.registry
            .unsubscribe(subscription.run_id(), subscription.id())
    }

    pub fn stats(&self) -> RuntimeStats {
        let fanout = self.fanout.stats();
        RuntimeStats {
            active_runs: self.orchestrator.active_runs(),
            tracked_run_ids: self.registry.run_count(),
            mapped_runs: self.registry.mapping_count(),
            subscribers: self.registry.subscriber_count(),
            queued_notifications: self.fanout.pending(),
            notifications_enqueued: fanout.enqueued(),
            notifications_dropped: fanout.dropped(),
            notifications_dispatched: fanout.dispatched(),
        }
    }

    /// Stop admitting runs, settle the active ones, deliver what is queued,
    /// and close every push channel. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.orchestrator
            .shutdown(self.config.shutdown_grace())
            .await;

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown().await;
            let closed = self.registry.close_subscribers();
            info!(closed_subscriptions = closed, "plan run runtime stopped");
        }
    }
}
