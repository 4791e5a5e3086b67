use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use planrun_core::{PlanRequest, RunId, RunPhase};
use tracing::{debug, info};

use crate::infra::{app_state::AppState, errors::AppResult, views::RunStateView};

/// Start a travel plan run. Answers as soon as the run is admitted; the
/// engine keeps working in the background.
pub async fn start_plan_handler(
    State(state): State<AppState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RunStateView>)> {
    let Json(request) = payload?;
    request.validate()?;

    let started = state.runtime().start_run(&request);
    info!(
        run_id = %started.run_id,
        phase = %started.snapshot.phase,
        origin = %request.origin,
        destination = %request.destination,
        "plan run accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(started.snapshot.into())))
}

/// Current snapshot of a run under either of its ids.
pub async fn plan_state_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> (StatusCode, Json<RunStateView>) {
    let snapshot = state.runtime().state(&RunId::new(run_id));

    let status = if snapshot.phase == RunPhase::NotFound {
        debug!(run_id = %snapshot.run_id, "state requested for unknown run");
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    (status, Json(snapshot.into()))
}
