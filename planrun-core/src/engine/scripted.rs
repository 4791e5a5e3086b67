//! Deterministic engine that replays a fixed list of steps.
//!
//! Used by the demo server and by tests to drive the synchronization
//! runtime without an external planner.

use std::{fmt, sync::Arc, time::Duration};

use serde_json::Value;
use uuid::Uuid;

use super::{
    EnginePhase, EngineRun, FinalResult, PlanDescriptor, PlanEngine, PlanStep, StepObserver,
};
use crate::{
    error::EngineError,
    serialize::{NamedOutput, OutputValue},
    types::RunId,
};

/// One scripted step and the output it produces.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    task: String,
    value: Value,
    output_name: Option<String>,
    tool_id: Option<String>,
    summary: Option<String>,
}

impl ScriptedStep {
    pub fn new(task: impl Into<String>, value: Value) -> Self {
        Self {
            task: task.into(),
            value,
            output_name: None,
            tool_id: None,
            summary: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn output_name(&self) -> Option<&str> {
        self.output_name.as_deref()
    }

    fn output(&self) -> NamedOutput<Value> {
        let mut output = NamedOutput::new(self.value.clone());
        if let Some(name) = &self.output_name {
            output = output.with_name(name.clone());
        }
        if let Some(summary) = &self.summary {
            output = output.with_summary(summary.clone());
        }
        output
    }
}

#[derive(Debug, Clone)]
enum FinalOutput {
    LastStep,
    Fixed(Value),
    Omitted,
}

#[derive(Debug, Clone)]
enum Failure {
    Raise(EngineError),
    Report(String),
}

pub struct ScriptedEngine {
    observer: Arc<dyn StepObserver>,
    steps: Vec<ScriptedStep>,
    step_delay: Duration,
    failure: Option<(usize, Failure)>,
    withhold_final_hook: bool,
    final_output: FinalOutput,
    run_prefix: String,
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("steps", &self.steps.len())
            .field("step_delay", &self.step_delay)
            .field("run_prefix", &self.run_prefix)
            .finish_non_exhaustive()
    }
}

impl ScriptedEngine {
    pub fn builder(observer: Arc<dyn StepObserver>) -> ScriptedEngineBuilder {
        ScriptedEngineBuilder {
            engine: ScriptedEngine {
                observer,
                steps: Vec::new(),
                step_delay: Duration::ZERO,
                failure: None,
                withhold_final_hook: false,
                final_output: FinalOutput::LastStep,
                run_prefix: "prun".to_string(),
            },
        }
    }

    fn plan_for(&self, query: &str) -> PlanDescriptor {
        PlanDescriptor {
            id: format!("plan-{}", Uuid::new_v4()),
            query: query.to_string(),
            steps: self
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| PlanStep {
                    index,
                    task: step.task.clone(),
                    tool_id: step.tool_id.clone(),
                    output_name: step.output_name.clone(),
                })
                .collect(),
        }
    }
}

impl PlanEngine for ScriptedEngine {
    fn run(&self, query: &str) -> Result<FinalResult, EngineError> {
        let plan = self.plan_for(query);
        if plan.steps.is_empty() {
            return Err(EngineError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut run = EngineRun {
            id: RunId::new(format!("{}-{}", self.run_prefix, Uuid::new_v4())),
            plan_id: plan.id.clone(),
            current_step_index: 0,
        };
        let mut last_output: Option<Arc<dyn OutputValue>> = None;

        for (step, scripted) in plan.steps.iter().zip(&self.steps) {
            match &self.failure {
                Some((index, Failure::Raise(err))) if *index == step.index => {
                    return Err(err.clone());
                }
                Some((index, Failure::Report(message))) if *index == step.index => {
                    return Ok(FinalResult {
                        run_id: run.id,
                        phase: EnginePhase::Failed,
                        current_step_index: -1,
                        final_output: None,
                        error: Some(message.clone()),
                    });
                }
                _ => {}
            }

            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }

            run.current_step_index = step.index;
            let output: Arc<dyn OutputValue> = Arc::new(scripted.output());
            if !(self.withhold_final_hook && plan.is_final_step(step.index)) {
                self.observer
                    .on_step_complete(&plan, &run, step, output.as_ref());
            }
            last_output = Some(output);
        }

        let final_output = match &self.final_output {
            FinalOutput::LastStep => last_output,
            FinalOutput::Fixed(value) => Some(Arc::new(value.clone()) as Arc<dyn OutputValue>),
            FinalOutput::Omitted => None,
        };

        Ok(FinalResult {
            current_step_index: run.current_step_index as i64,
            run_id: run.id,
            phase: EnginePhase::Complete,
            final_output,
            error: None,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedEngineBuilder {
    engine: ScriptedEngine,
}

impl ScriptedEngineBuilder {
    pub fn step(mut self, step: ScriptedStep) -> Self {
        self.engine.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        self.engine.steps.extend(steps);
        self
    }

    /// Blocking pause before each step.
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.engine.step_delay = delay;
        self
    }

    /// Raise `err` from `run` when step `index` is reached.
    pub fn fail_at(mut self, index: usize, err: EngineError) -> Self {
        self.engine.failure = Some((index, Failure::Raise(err)));
        self
    }

    /// Return a `Failed` result when step `index` is reached.
    pub fn report_failure_at(mut self, index: usize, message: impl Into<String>) -> Self {
        self.engine.failure = Some((index, Failure::Report(message.into())));
        self
    }

    /// Skip the hook for the last step so only the final result reports it.
    pub fn withhold_final_hook(mut self) -> Self {
        self.engine.withhold_final_hook = true;
        self
    }

    pub fn final_output(mut self, value: Value) -> Self {
        self.engine.final_output = FinalOutput::Fixed(value);
        self
    }

    /// Complete without any final output.
    pub fn omit_final_output(mut self) -> Self {
        self.engine.final_output = FinalOutput::Omitted;
        self
    }

    pub fn run_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.engine.run_prefix = prefix.into();
        self
    }

    pub fn build(self) -> ScriptedEngine {
        self.engine
    }
}
