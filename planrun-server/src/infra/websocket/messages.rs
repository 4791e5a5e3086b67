use axum::extract::ws::Message;
use planrun_core::safe_serialize;

use crate::infra::views::RunStateView;

/// Encode a snapshot as a text frame. Values that cannot be structured
/// degrade to their string form rather than dropping the frame.
pub fn snapshot_frame(view: &RunStateView) -> Message {
    Message::Text(safe_serialize(view).render().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use planrun_core::{RunId, RunState};

    #[test]
    fn frames_are_json_snapshots() {
        let view = RunStateView::from(RunState::preparing(RunId::new("client-1")));
        let Message::Text(text) = snapshot_frame(&view) else {
            panic!("expected a text frame");
        };

        let body: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(body["run_id"], "client-1");
        assert_eq!(body["phase"], "PREPARING");
        assert_eq!(body["status_message"], "Plan is being prepared...");
    }
}
