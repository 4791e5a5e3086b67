use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tracing::{debug, error};

use crate::{
    engine::{EngineRun, PlanDescriptor, PlanStep, StepObserver},
    fanout::FanoutQueue,
    registry::RunRegistry,
    serialize::{OutputValue, preview, safe_serialize},
    types::StepOutputRecord,
};

/// The engine-facing step hook.
///
/// Merges each completed step into the run snapshot under every id of the
/// run and queues one notification per written id. It never blocks on
/// subscribers and never propagates a failure back into the engine.
#[derive(Debug, Clone)]
pub struct StepEventIngestor {
    registry: Arc<RunRegistry>,
    fanout: FanoutQueue,
    preview_len: usize,
}

impl StepEventIngestor {
    pub fn new(registry: Arc<RunRegistry>, fanout: FanoutQueue, preview_len: usize) -> Self {
        Self {
            registry,
            fanout,
            preview_len,
        }
    }

    fn ingest(
        &self,
        plan: &PlanDescriptor,
        run: &EngineRun,
        step: &PlanStep,
        output: &dyn OutputValue,
    ) -> usize {
        let record = capture(step.index, output, self.preview_len);
        let final_output = plan
            .is_final_step(step.index)
            .then(|| safe_serialize(output));

        let written = self.registry.apply_step(&run.id, record, final_output);
        if written.is_empty() {
            debug!(engine_run_id = %run.id, step_index = step.index, "step event ignored");
            return 0;
        }
        debug!(
            engine_run_id = %run.id,
            step_index = step.index,
            copies = written.len(),
            "merged step output"
        );
        self.fanout.publish_all(written)
    }
}

impl StepObserver for StepEventIngestor {
    fn on_step_complete(
        &self,
        plan: &PlanDescriptor,
        run: &EngineRun,
        step: &PlanStep,
        output: &dyn OutputValue,
    ) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.ingest(plan, run, step, output)));
        if outcome.is_err() {
            error!(
                engine_run_id = %run.id,
                step_index = step.index,
                "step ingestion panicked; event discarded"
            );
        }
    }
}

/// Build the stored record for one step output.
///
/// The name is the engine-supplied one or `step_<index>`; the summary is the
/// engine-native one or a truncated preview of the output.
pub fn capture(step_index: usize, output: &dyn OutputValue, preview_len: usize) -> StepOutputRecord {
    let value = safe_serialize(output);
    let summary = output
        .summary()
        .unwrap_or_else(|| preview(&value.render(), preview_len));
    StepOutputRecord {
        output_name: output
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("step_{step_index}")),
        value,
        summary,
        step_index,
    }
}
