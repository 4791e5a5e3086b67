use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{serialize::SerializedValue, types::RunId};

/// Lifecycle phase of a plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Preparing,
    InProgress,
    Complete,
    Failed,
    NotFound,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Preparing => "PREPARING",
            RunPhase::InProgress => "IN_PROGRESS",
            RunPhase::Complete => "COMPLETE",
            RunPhase::Failed => "FAILED",
            RunPhase::NotFound => "NOT_FOUND",
        }
    }

    fn rank(self) -> u8 {
        match self {
            RunPhase::NotFound => 0,
            RunPhase::Preparing => 1,
            RunPhase::InProgress => 2,
            RunPhase::Complete | RunPhase::Failed => 3,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output captured for one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutputRecord {
    pub output_name: String,
    pub value: SerializedValue,
    pub summary: String,
    pub step_index: usize,
}

/// Authoritative snapshot of one logical run, as stored under one of its ids.
///
/// Invariants maintained by the transition methods:
/// - `final_output` is present iff `phase == COMPLETE`
/// - `error` is present iff `phase` is `FAILED` (or `NOT_FOUND` for lookups)
/// - `step_outputs` only grows
/// - a terminal snapshot never transitions again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub phase: RunPhase,
    pub current_step_index: i64,
    #[serde(default)]
    pub step_outputs: BTreeMap<String, StepOutputRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<SerializedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Engine-assigned id of this run once it is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_run_id: Option<RunId>,
    /// Per-run change counter shared by every id-keyed copy of the run.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn preparing(run_id: RunId) -> Self {
        Self {
            run_id,
            phase: RunPhase::Preparing,
            current_step_index: 0,
            step_outputs: BTreeMap::new(),
            final_output: None,
            error: None,
            engine_run_id: None,
            revision: 1,
            updated_at: Utc::now(),
        }
    }

    /// First snapshot of a run that is only known through engine events.
    pub fn started_by_engine(engine_run_id: RunId) -> Self {
        Self {
            engine_run_id: Some(engine_run_id.clone()),
            phase: RunPhase::InProgress,
            revision: 0,
            ..Self::preparing(engine_run_id)
        }
    }

    pub fn not_found(run_id: RunId) -> Self {
        Self {
            phase: RunPhase::NotFound,
            current_step_index: -1,
            error: Some("Plan not found".to_string()),
            revision: 0,
            ..Self::preparing(run_id)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Copy of this snapshot as stored under another id of the same run.
    pub fn rekeyed(&self, run_id: &RunId) -> Self {
        Self {
            run_id: run_id.clone(),
            ..self.clone()
        }
    }

    /// Merge a step record. Existing entries for other steps are kept.
    pub fn record_step(&mut self, record: StepOutputRecord) {
        self.step_outputs
            .insert(record.output_name.clone(), record);
    }

    pub fn advance_to(&mut self, step_index: usize) {
        self.phase = RunPhase::InProgress;
        self.current_step_index = self.current_step_index.max(step_index as i64);
    }

    pub fn complete(&mut self, step_index: i64, final_output: SerializedValue) {
        self.phase = RunPhase::Complete;
        self.current_step_index = self.current_step_index.max(step_index);
        self.final_output = Some(final_output);
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.phase = RunPhase::Failed;
        self.current_step_index = -1;
        self.final_output = None;
        self.error = Some(error.into());
    }

    /// Structured form of every collected step output, used as the final
    /// output when the engine completes without providing one.
    pub fn collected_outputs(&self) -> SerializedValue {
        let map = self
            .step_outputs
            .iter()
            .map(|(name, record)| (name.clone(), record.value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        SerializedValue::Structured(serde_json::Value::Object(map))
    }

    /// Fold another copy of the same logical run into this one.
    ///
    /// The more advanced copy wins the phase (ties go to `self`), step outputs
    /// are unioned, and the revision moves past both inputs.
    pub fn reconcile(self, other: RunState) -> RunState {
        let (mut base, extra) = if other.advances_past(&self) {
            (other, self)
        } else {
            (self, other)
        };

        for (name, record) in extra.step_outputs {
            base.step_outputs.entry(name).or_insert(record);
        }
        if base.engine_run_id.is_none() {
            base.engine_run_id = extra.engine_run_id;
        }
        base.revision = base.revision.max(extra.revision);
        base
    }

    fn advances_past(&self, other: &RunState) -> bool {
        (self.phase.rank(), self.current_step_index)
            > (other.phase.rank(), other.current_step_index)
    }

    /// Human readable progress line for pollers.
    pub fn status_message(&self) -> String {
        match self.phase {
            RunPhase::Preparing => "Plan is being prepared...".to_string(),
            RunPhase::InProgress => {
                format!("Processing step {}", self.current_step_index + 1)
            }
            RunPhase::Complete => "Plan completed successfully".to_string(),
            RunPhase::Failed => format!(
                "Plan failed: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            ),
            RunPhase::NotFound => "Plan not found in the system".to_string(),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} {} at step {} (revision {})",
            self.run_id, self.phase, self.current_step_index, self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, index: usize) -> StepOutputRecord {
        StepOutputRecord {
            output_name: name.to_string(),
            value: SerializedValue::Structured(json!({ "step": index })),
            summary: format!("step {index}"),
            step_index: index,
        }
    }

    #[test]
    fn completed_snapshot_serializes_final_output_but_no_error() {
        let mut state = RunState::preparing(RunId::new("client"));
        state.complete(2, SerializedValue::Text("done".into()));

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["phase"], "COMPLETE");
        assert_eq!(value["final_output"], "done");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failing_clears_final_output_and_resets_step_index() {
        let mut state = RunState::preparing(RunId::new("client"));
        state.advance_to(1);
        state.fail("timeout");

        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.current_step_index, -1);
        assert_eq!(state.error.as_deref(), Some("timeout"));
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("final_output").is_none());
    }

    #[test]
    fn step_index_never_moves_backwards_while_in_progress() {
        let mut state = RunState::preparing(RunId::new("client"));
        state.advance_to(2);
        state.advance_to(1);
        assert_eq!(state.current_step_index, 2);
    }

    #[test]
    fn reconcile_prefers_the_more_advanced_copy_and_unions_outputs() {
        let mut client = RunState::preparing(RunId::new("client"));
        client.revision = 1;

        let mut engine = RunState::started_by_engine(RunId::new("engine"));
        engine.record_step(record("step_0", 0));
        engine.record_step(record("step_1", 1));
        engine.advance_to(1);
        engine.revision = 3;

        let merged = client.reconcile(engine);
        assert_eq!(merged.phase, RunPhase::InProgress);
        assert_eq!(merged.current_step_index, 1);
        assert_eq!(merged.step_outputs.len(), 2);
        assert_eq!(merged.revision, 3);
        assert_eq!(merged.engine_run_id, Some(RunId::new("engine")));
    }

    #[test]
    fn status_message_counts_steps_from_one() {
        let mut state = RunState::preparing(RunId::new("client"));
        assert_eq!(state.status_message(), "Plan is being prepared...");
        state.advance_to(0);
        assert_eq!(state.status_message(), "Processing step 1");
        state.fail("boom");
        assert_eq!(state.status_message(), "Plan failed: boom");
    }
}
