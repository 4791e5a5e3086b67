use std::{sync::Arc, time::Duration};

use planrun_core::{
    EngineError, EngineRun, PlanDescriptor, PlanEngine, PlanRequest, PlanRunRuntime, PlanStep,
    RunId, RunPhase, RunState, ScriptedEngine, ScriptedEngineBuilder, ScriptedStep,
    SerializedValue, StepObserver, SyncConfig,
};
use serde_json::json;

fn request() -> PlanRequest {
    PlanRequest {
        origin: "Delhi".into(),
        destination: "Goa".into(),
        departure_date: "2025-09-01".into(),
        return_date: "2025-09-07".into(),
        cabin_class: "economy".into(),
        passengers: 2,
    }
}

fn travel_steps() -> Vec<ScriptedStep> {
    vec![
        ScriptedStep::new("Search outbound flights", json!({"airline": "IndiGo", "price": 4200.0}))
            .with_name("$outbound"),
        ScriptedStep::new("Search hotels", json!({"hotel": "Sea View", "price": 3100.0}))
            .with_name("$hotel"),
        ScriptedStep::new("Summarise", json!({"summary": "Cheapest round trip"})),
    ]
}

fn runtime_with(
    configure: impl FnOnce(ScriptedEngineBuilder) -> ScriptedEngineBuilder,
) -> PlanRunRuntime {
    PlanRunRuntime::start(SyncConfig::default(), |observer| {
        Arc::new(configure(ScriptedEngine::builder(observer)).build()) as Arc<dyn PlanEngine>
    })
}

async fn wait_terminal(runtime: &PlanRunRuntime, id: &RunId) -> RunState {
    for _ in 0..500 {
        let state = runtime.state(id);
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {id} did not finish");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_step_run_is_identical_under_both_ids() {
    let runtime = runtime_with(|engine| engine.steps(travel_steps()));

    let started = runtime.start_run(&request());
    assert_eq!(started.snapshot.phase, RunPhase::Preparing);
    assert_eq!(started.snapshot.current_step_index, 0);
    assert!(started.snapshot.step_outputs.is_empty());

    let by_client = wait_terminal(&runtime, &started.run_id).await;
    let engine_id = by_client.engine_run_id.clone().expect("engine id mapped");
    let by_engine = runtime.state(&engine_id);

    for state in [&by_client, &by_engine] {
        assert_eq!(state.phase, RunPhase::Complete);
        assert_eq!(state.current_step_index, 2);
        assert_eq!(state.step_outputs.len(), 3);
        assert!(state.final_output.is_some());
        assert!(state.error.is_none());
    }
    assert_eq!(by_client.step_outputs, by_engine.step_outputs);
    assert_eq!(by_client.final_output, by_engine.final_output);
    assert_eq!(by_client.run_id, started.run_id);
    assert_eq!(by_engine.run_id, engine_id);

    let names: Vec<_> = by_client.step_outputs.keys().cloned().collect();
    assert_eq!(names, vec!["$hotel", "$outbound", "step_2"]);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_connection_error_fails_the_run_with_its_message() {
    let runtime = runtime_with(|engine| {
        engine
            .steps(travel_steps())
            .fail_at(0, EngineError::Connection("timeout".into()))
    });

    let started = runtime.start_run(&request());
    let state = wait_terminal(&runtime, &started.run_id).await;

    assert_eq!(state.phase, RunPhase::Failed);
    assert_eq!(state.current_step_index, -1);
    assert_eq!(state.error.as_deref(), Some("timeout"));

    let body = serde_json::to_value(&state).unwrap();
    assert!(body.get("final_output").is_none());
    assert_eq!(body["error"], "timeout");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_reported_failure_is_terminal() {
    let runtime = runtime_with(|engine| {
        engine
            .steps(travel_steps())
            .report_failure_at(2, "no hotels available")
    });

    let started = runtime.start_run(&request());
    let state = wait_terminal(&runtime, &started.run_id).await;

    assert_eq!(state.phase, RunPhase::Failed);
    assert_eq!(state.error.as_deref(), Some("no hotels available"));
    assert_eq!(state.step_outputs.len(), 2);
    assert_eq!(state.status_message(), "Plan failed: no hotels available");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_final_hook_is_completed_from_the_engine_result() {
    let runtime = runtime_with(|engine| engine.steps(travel_steps()).withhold_final_hook());

    let started = runtime.start_run(&request());
    let state = wait_terminal(&runtime, &started.run_id).await;

    assert_eq!(state.phase, RunPhase::Complete);
    assert_eq!(state.current_step_index, 2);
    assert_eq!(state.step_outputs.len(), 2);
    assert_eq!(
        state.final_output,
        Some(SerializedValue::Structured(json!({"summary": "Cheapest round trip"})))
    );

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_without_output_falls_back_to_collected_steps() {
    let runtime = runtime_with(|engine| {
        engine
            .steps(travel_steps())
            .withhold_final_hook()
            .omit_final_output()
    });

    let started = runtime.start_run(&request());
    let state = wait_terminal(&runtime, &started.run_id).await;

    assert_eq!(state.phase, RunPhase::Complete);
    let output = state.final_output.expect("fallback output").to_json();
    assert_eq!(output["$outbound"]["airline"], "IndiGo");
    assert_eq!(output["$hotel"]["hotel"], "Sea View");

    runtime.shutdown().await;
}

#[tokio::test]
async fn unknown_run_id_is_not_found() {
    let runtime = runtime_with(|engine| engine.steps(travel_steps()));

    let state = runtime.state(&RunId::new("does-not-exist"));
    assert_eq!(state.phase, RunPhase::NotFound);
    assert_eq!(state.current_step_index, -1);
    assert_eq!(state.error.as_deref(), Some("Plan not found"));
    assert_eq!(state.status_message(), "Plan not found in the system");

    runtime.shutdown().await;
}

/// Engine whose hook runs on its own thread and whose run call panics.
struct PanickingEngine {
    observer: Arc<dyn StepObserver>,
}

impl PlanEngine for PanickingEngine {
    fn run(&self, query: &str) -> Result<planrun_core::FinalResult, EngineError> {
        let plan = PlanDescriptor {
            id: "plan".into(),
            query: query.into(),
            steps: vec![PlanStep {
                index: 0,
                task: "only".into(),
                tool_id: None,
                output_name: None,
            }],
        };
        let run = EngineRun {
            id: RunId::new("engine-panics"),
            plan_id: plan.id.clone(),
            current_step_index: 0,
        };
        let plan_for_thread = plan.clone();
        let run_for_thread = run.clone();
        let observer = Arc::clone(&self.observer);
        std::thread::spawn(move || {
            observer.on_step_complete(
                &plan_for_thread,
                &run_for_thread,
                &plan_for_thread.steps[0],
                &json!({"partial": true}),
            );
        })
        .join()
        .ok();
        panic!("engine crashed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_panic_is_reported_as_failure() {
    let runtime = PlanRunRuntime::start(SyncConfig::default(), |observer| {
        Arc::new(PanickingEngine { observer }) as Arc<dyn PlanEngine>
    });

    let started = runtime.start_run(&request());
    let state = wait_terminal(&runtime, &started.run_id).await;
    assert_eq!(state.phase, RunPhase::Failed);
    assert_eq!(state.error.as_deref(), Some("plan engine panicked"));

    let engine_copy = runtime.state(&RunId::new("engine-panics"));
    assert_eq!(engine_copy.step_outputs.len(), 1);

    runtime.shutdown().await;
}
