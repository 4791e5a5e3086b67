use std::fmt;

use planrun_core::{OutputValue, RunState};
use serde::Serialize;
use serde_json::Value;

/// Snapshot as served to pollers and subscribers: the run state plus a
/// human readable progress line.
#[derive(Debug, Clone, Serialize)]
pub struct RunStateView {
    #[serde(flatten)]
    pub state: RunState,
    pub status_message: String,
}

impl From<RunState> for RunStateView {
    fn from(state: RunState) -> Self {
        let status_message = state.status_message();
        Self {
            state,
            status_message,
        }
    }
}

impl fmt::Display for RunStateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.status_message)
    }
}

impl OutputValue for RunStateView {
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planrun_core::RunId;

    #[test]
    fn not_found_view_flattens_state_fields() {
        let view = RunStateView::from(RunState::not_found(RunId::new("missing")));
        let body = view.to_json().unwrap();

        assert_eq!(body["run_id"], "missing");
        assert_eq!(body["phase"], "NOT_FOUND");
        assert_eq!(body["current_step_index"], -1);
        assert_eq!(body["step_outputs"], serde_json::json!({}));
        assert_eq!(body["error"], "Plan not found");
        assert_eq!(body["status_message"], "Plan not found in the system");
        assert!(body.get("final_output").is_none());
    }
}
