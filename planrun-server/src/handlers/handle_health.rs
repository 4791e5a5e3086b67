use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.runtime().stats();
    let uptime = Utc::now() - state.started_at();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime.num_seconds(),
        "runtime": stats,
    }))
}
