//! Boundary to the opaque planning engine.
//!
//! The engine is configured with a [`StepObserver`] when it is constructed
//! and calls it synchronously after each completed step, from whatever
//! thread runs [`PlanEngine::run`].

pub mod scripted;

use std::{fmt, sync::Arc};

use crate::{error::EngineError, serialize::OutputValue, types::RunId};

/// Plan produced by the engine for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDescriptor {
    pub id: String,
    pub query: String,
    pub steps: Vec<PlanStep>,
}

impl PlanDescriptor {
    pub fn is_final_step(&self, step_index: usize) -> bool {
        step_index + 1 >= self.steps.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub index: usize,
    pub task: String,
    pub tool_id: Option<String>,
    pub output_name: Option<String>,
}

/// Engine-side view of a run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRun {
    pub id: RunId,
    pub plan_id: String,
    pub current_step_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    InProgress,
    Complete,
    Failed,
}

/// Result of a finished [`PlanEngine::run`] call.
#[derive(Clone)]
pub struct FinalResult {
    pub run_id: RunId,
    pub phase: EnginePhase,
    pub current_step_index: i64,
    pub final_output: Option<Arc<dyn OutputValue>>,
    pub error: Option<String>,
}

impl fmt::Debug for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalResult")
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("current_step_index", &self.current_step_index)
            .field("has_final_output", &self.final_output.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// Per-step hook the engine calls after each completed step.
///
/// Implementations must return promptly and must not panic; the engine run
/// is blocked while the hook executes.
pub trait StepObserver: Send + Sync {
    fn on_step_complete(
        &self,
        plan: &PlanDescriptor,
        run: &EngineRun,
        step: &PlanStep,
        output: &dyn OutputValue,
    );
}

/// Blocking planning engine.
pub trait PlanEngine: Send + Sync {
    fn run(&self, query: &str) -> Result<FinalResult, EngineError>;
}
