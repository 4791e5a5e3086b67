use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinSet};
use tracing::{error, info, instrument, warn};

use crate::{
    engine::{EnginePhase, FinalResult, PlanEngine},
    error::RunError,
    fanout::FanoutQueue,
    registry::RunRegistry,
    serialize::safe_serialize,
    types::{PlanRequest, RunId, RunState},
};

const CANCELLED_MESSAGE: &str = "run cancelled during shutdown";

/// Client-facing id and initial snapshot of a started run.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: RunId,
    pub snapshot: RunState,
}

/// Admits plan runs and supervises their execution.
///
/// Every admitted run executes as one task in a [`JoinSet`] owned by the
/// orchestrator; the blocking engine call itself runs on the blocking pool.
pub struct RunOrchestrator {
    registry: Arc<RunRegistry>,
    fanout: FanoutQueue,
    engine: Arc<dyn PlanEngine>,
    max_concurrent_runs: usize,
    runs: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    pub fn new(
        registry: Arc<RunRegistry>,
        fanout: FanoutQueue,
        engine: Arc<dyn PlanEngine>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            registry,
            fanout,
            engine,
            max_concurrent_runs: max_concurrent_runs.max(1),
            runs: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Allocate a run, seed its `PREPARING` snapshot, and schedule it.
    ///
    /// Never waits on the engine. When scheduling fails the run is already
    /// `FAILED` in the returned snapshot, so the caller always gets a usable id.
    #[instrument(
        name = "run_orchestrator.start",
        skip(self, request),
        fields(origin = %request.origin, destination = %request.destination)
    )]
    pub fn start(&self, request: &PlanRequest) -> StartedRun {
        let run_id = RunId::generate();
        let snapshot = RunState::preparing(run_id.clone());
        self.registry.seed(snapshot.clone());

        match self.schedule(run_id.clone(), request.to_query()) {
            Ok(()) => {
                info!(run_id = %run_id, "plan run scheduled");
                StartedRun { run_id, snapshot }
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "plan run could not be scheduled");
                self.fanout
                    .publish_all(self.registry.fail(&run_id, err.to_string()));
                let snapshot = self.registry.lookup(&run_id);
                StartedRun { run_id, snapshot }
            }
        }
    }

    fn schedule(&self, run_id: RunId, query: String) -> Result<(), RunError> {
        let handle = Handle::try_current()
            .map_err(|err| RunError::SchedulingFailure(format!("no async runtime: {err}")))?;

        // `accepting` only changes under this lock, so an admitted run always
        // lands in the set that shutdown takes.
        let mut runs = self.runs.lock();
        if !self.accepting.load(Ordering::Acquire) {
            return Err(RunError::SchedulingFailure(
                "runtime is shutting down".to_string(),
            ));
        }
        reap_finished(&mut runs);
        if runs.len() >= self.max_concurrent_runs {
            return Err(RunError::SchedulingFailure(format!(
                "{} plan runs already executing",
                runs.len()
            )));
        }

        let task = RunTask {
            guard: TerminalGuard {
                run_id: run_id.clone(),
                registry: Arc::clone(&self.registry),
                fanout: self.fanout.clone(),
                armed: true,
            },
            run_id,
            query,
            registry: Arc::clone(&self.registry),
            fanout: self.fanout.clone(),
            engine: Arc::clone(&self.engine),
        };
        runs.spawn_on(task.execute(), &handle);
        Ok(())
    }

    /// Runs admitted and not yet finished.
    pub fn active_runs(&self) -> usize {
        let mut runs = self.runs.lock();
        reap_finished(&mut runs);
        runs.len()
    }

    /// Stop admitting runs, wait up to `grace` for active ones, then abort
    /// the rest. Aborted runs are written as `FAILED`.
    #[instrument(name = "run_orchestrator.shutdown", skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        let mut runs = {
            let mut live = self.runs.lock();
            self.accepting.store(false, Ordering::Release);
            std::mem::take(&mut *live)
        };
        if runs.is_empty() {
            return;
        }

        info!(active = runs.len(), "waiting for active plan runs");
        if tokio::time::timeout(grace, drain(&mut runs)).await.is_err() {
            warn!(
                remaining = runs.len(),
                "shutdown grace period elapsed; aborting plan runs"
            );
            runs.shutdown().await;
        }
    }
}

fn reap_finished(runs: &mut JoinSet<()>) {
    while let Some(result) = runs.try_join_next() {
        if let Err(err) = result
            && err.is_panic()
        {
            error!(?err, "plan run task panicked");
        }
    }
}

async fn drain(runs: &mut JoinSet<()>) {
    while runs.join_next().await.is_some() {}
}

struct RunTask {
    run_id: RunId,
    query: String,
    registry: Arc<RunRegistry>,
    fanout: FanoutQueue,
    engine: Arc<dyn PlanEngine>,
    // Owned by the task from admission so a run aborted before its first
    // poll is still settled.
    guard: TerminalGuard,
}

impl RunTask {
    async fn execute(mut self) {
        let engine = Arc::clone(&self.engine);
        let query = self.query.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.run(&query)).await;

        match outcome {
            Ok(Ok(result)) => self.finish(result),
            Ok(Err(err)) => {
                let message = err.to_string();
                error!(
                    run_id = %self.run_id,
                    error = %RunError::EngineFailure(message.clone()),
                    "plan run failed"
                );
                self.publish(self.registry.fail(&self.run_id, message));
            }
            Err(err) => {
                let message = if err.is_panic() {
                    "plan engine panicked"
                } else {
                    "plan engine task cancelled"
                };
                error!(run_id = %self.run_id, ?err, "{message}");
                self.publish(self.registry.fail(&self.run_id, message));
            }
        }
        self.guard.armed = false;
    }

    fn finish(&self, result: FinalResult) {
        let FinalResult {
            run_id: engine_id,
            phase,
            current_step_index,
            final_output,
            error,
        } = result;

        self.publish(self.registry.record_mapping(&self.run_id, &engine_id));

        match phase {
            EnginePhase::Complete => {
                let output = final_output.as_deref().map(safe_serialize);
                let written = self
                    .registry
                    .complete(&self.run_id, current_step_index, output);
                if !written.is_empty() {
                    info!(
                        run_id = %self.run_id,
                        engine_run_id = %engine_id,
                        "terminal snapshot written from engine result"
                    );
                }
                self.publish(written);
            }
            EnginePhase::Failed => {
                let message = error.unwrap_or_else(|| "plan run failed".to_string());
                warn!(run_id = %self.run_id, error = %message, "engine reported failure");
                self.publish(self.registry.fail(&self.run_id, message));
            }
            EnginePhase::InProgress => {
                warn!(
                    run_id = %self.run_id,
                    engine_run_id = %engine_id,
                    "engine returned without reaching a terminal phase"
                );
            }
        }

        info!(
            run_id = %self.run_id,
            phase = %self.registry.lookup(&self.run_id).phase,
            "plan run finished"
        );
    }

    fn publish(&self, snapshots: Vec<RunState>) {
        self.fanout.publish_all(snapshots);
    }
}

/// Writes `FAILED` if the run task is dropped before its terminal write,
/// e.g. when aborted at shutdown.
struct TerminalGuard {
    run_id: RunId,
    registry: Arc<RunRegistry>,
    fanout: FanoutQueue,
    armed: bool,
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let written = self.registry.fail(&self.run_id, CANCELLED_MESSAGE);
        if !written.is_empty() {
            warn!(run_id = %self.run_id, "plan run cancelled before completion");
        }
        self.fanout.publish_all(written);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        engine::{
            EngineRun, PlanDescriptor, PlanStep, StepObserver,
            scripted::{ScriptedEngine, ScriptedStep},
        },
        serialize::OutputValue,
        types::RunPhase,
    };

    struct NoopObserver;

    impl StepObserver for NoopObserver {
        fn on_step_complete(
            &self,
            _plan: &PlanDescriptor,
            _run: &EngineRun,
            _step: &PlanStep,
            _output: &dyn OutputValue,
        ) {
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            origin: "Delhi".into(),
            destination: "Goa".into(),
            departure_date: "2025-09-01".into(),
            return_date: "2025-09-07".into(),
            cabin_class: "economy".into(),
            passengers: 1,
        }
    }

    fn orchestrator(engine: ScriptedEngine, limit: usize) -> (RunOrchestrator, Arc<RunRegistry>) {
        let registry = Arc::new(RunRegistry::new());
        let (fanout, _) = FanoutQueue::channel(64);
        let orchestrator =
            RunOrchestrator::new(Arc::clone(&registry), fanout, Arc::new(engine), limit);
        (orchestrator, registry)
    }

    async fn wait_terminal(registry: &RunRegistry, id: &RunId) -> RunState {
        for _ in 0..200 {
            let state = registry.lookup(id);
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} never reached a terminal phase");
    }

    #[test]
    fn start_without_a_runtime_fails_immediately() {
        let engine = ScriptedEngine::builder(Arc::new(NoopObserver))
            .step(ScriptedStep::new("a", json!(1)))
            .build();
        let (orchestrator, registry) = orchestrator(engine, 4);

        let started = orchestrator.start(&request());
        assert_eq!(started.snapshot.phase, RunPhase::Failed);
        assert!(
            started
                .snapshot
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("failed to schedule plan run"))
        );
        assert_eq!(registry.lookup(&started.run_id).phase, RunPhase::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn admission_limit_is_a_scheduling_failure() {
        let engine = ScriptedEngine::builder(Arc::new(NoopObserver))
            .step(ScriptedStep::new("slow", json!(1)))
            .step_delay(Duration::from_millis(200))
            .build();
        let (orchestrator, _registry) = orchestrator(engine, 1);

        let first = orchestrator.start(&request());
        let second = orchestrator.start(&request());
        assert_eq!(first.snapshot.phase, RunPhase::Preparing);
        assert_eq!(second.snapshot.phase, RunPhase::Failed);
        assert_eq!(orchestrator.active_runs(), 1);

        orchestrator.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completed_engine_result_maps_ids_and_completes_without_hooks() {
        let engine = ScriptedEngine::builder(Arc::new(NoopObserver))
            .step(ScriptedStep::new("a", json!({"flight": "AI-101"})))
            .run_prefix("eng")
            .build();
        let (orchestrator, registry) = orchestrator(engine, 4);

        let started = orchestrator.start(&request());
        let state = wait_terminal(&registry, &started.run_id).await;
        assert_eq!(state.phase, RunPhase::Complete);
        assert_eq!(state.run_id, started.run_id);

        let engine_id = state.engine_run_id.clone().unwrap();
        assert!(engine_id.as_str().starts_with("eng-"));
        assert_eq!(registry.lookup(&engine_id).phase, RunPhase::Complete);
        assert_eq!(
            state.final_output.map(|v| v.to_json()),
            Some(json!({"flight": "AI-101"}))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_after_grace_marks_runs_cancelled() {
        let engine = ScriptedEngine::builder(Arc::new(NoopObserver))
            .step(ScriptedStep::new("slow", json!(1)))
            .step_delay(Duration::from_millis(500))
            .build();
        let (orchestrator, registry) = orchestrator(engine, 4);

        let started = orchestrator.start(&request());
        orchestrator.shutdown(Duration::from_millis(20)).await;

        let state = registry.lookup(&started.run_id);
        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.error.as_deref(), Some(CANCELLED_MESSAGE));

        let rejected = orchestrator.start(&request());
        assert_eq!(rejected.snapshot.phase, RunPhase::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_admitted_during_shutdown_are_always_settled() {
        let engine = ScriptedEngine::builder(Arc::new(NoopObserver))
            .step(ScriptedStep::new("slow", json!(1)))
            .step_delay(Duration::from_millis(20))
            .build();
        let (orchestrator, registry) = orchestrator(engine, 100_000);
        let orchestrator = Arc::new(orchestrator);
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let stop = Arc::clone(&stop);
                let handle = Handle::current();
                std::thread::spawn(move || {
                    let _entered = handle.enter();
                    let mut admitted = Vec::new();
                    while !stop.load(Ordering::Relaxed) {
                        let started = orchestrator.start(&request());
                        if started.snapshot.phase == RunPhase::Preparing {
                            admitted.push(started.run_id);
                        }
                    }
                    admitted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        orchestrator.shutdown(Duration::from_millis(1)).await;
        stop.store(true, Ordering::Relaxed);

        let admitted: Vec<RunId> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        assert!(!admitted.is_empty());

        let unsettled: Vec<&RunId> = admitted
            .iter()
            .filter(|id| !registry.lookup(id).is_terminal())
            .collect();
        assert!(unsettled.is_empty(), "{} admitted runs never settled", unsettled.len());
        assert_eq!(orchestrator.active_runs(), 0);
    }
}
