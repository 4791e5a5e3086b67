use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    handlers::{health_handler, plan_state_handler, plan_websocket_handler, start_plan_handler},
    infra::{app_state::AppState, config::CorsConfig},
};

/// Build the application router with all plan routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors_layer = cors_layer(&state.config().cors);

    Router::new()
        .route("/health", get(health_handler))
        .route("/plan/start", post(start_plan_handler))
        .route("/plan/{run_id}/state", get(plan_state_handler))
        .route("/plan/{run_id}/ws", get(plan_websocket_handler))
        // Outer to inner: CORS, then tracing
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
