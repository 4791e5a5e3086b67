use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum_test::TestServer;
use planrun_core::PlanRunRuntime;
use planrun_server::{
    AppState,
    infra::{config::Config, engine},
    routes::build_router,
};
use serde_json::{Value, json};

pub struct TestApp {
    pub server: TestServer,
    pub runtime: Arc<PlanRunRuntime>,
}

pub fn build_test_app(step_delay_ms: u64) -> Result<TestApp> {
    let mut config = Config::default();
    config.demo.step_delay_ms = step_delay_ms;
    config.sync.shutdown_grace_ms = 500;

    let runtime = engine::start_runtime(&config);
    let state = AppState::new(Arc::clone(&runtime), Arc::new(config));
    let server = TestServer::builder()
        .http_transport()
        .build(build_router(state))
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    Ok(TestApp { server, runtime })
}

pub fn travel_request() -> Value {
    json!({
        "origin": "Delhi",
        "destination": "Goa",
        "departure_date": "2025-09-01",
        "return_date": "2025-09-07",
        "cabin_class": "economy",
        "passengers": 2
    })
}

/// Poll the state endpoint until the run is terminal.
pub async fn poll_until_terminal(server: &TestServer, run_id: &str) -> Value {
    for _ in 0..300 {
        let body: Value = server.get(&format!("/plan/{run_id}/state")).await.json();
        if matches!(body["phase"].as_str(), Some("COMPLETE" | "FAILED")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} never reached a terminal phase");
}
