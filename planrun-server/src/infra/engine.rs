//! Demo travel planner wired into the runtime.
//!
//! The real planner is an external service; the server ships a scripted
//! stand-in that walks the same steps (outbound flight, return flight,
//! accommodation, summary) and produces the same output shape.

use std::{sync::Arc, time::Duration};

use planrun_core::{PlanEngine, PlanRunRuntime, ScriptedEngine, ScriptedStep, StepObserver};
use serde_json::{Value, json};

use super::config::Config;

const DEMO_RUN_PREFIX: &str = "prun";

fn departure_flight() -> Value {
    json!({
        "Airline": "IndiGo",
        "deepLinkUrl": "https://www.skyscanner.co.in/transport/flights/del/goi/",
        "price": 4_850.0,
        "departTime": "06:15",
        "arrivalTime": "08:45",
    })
}

fn return_flight() -> Value {
    json!({
        "Airline": "Air India",
        "deepLinkUrl": "https://www.skyscanner.co.in/transport/flights/goi/del/",
        "price": 5_120.0,
        "departTime": "19:30",
        "arrivalTime": "22:05",
    })
}

fn accommodation() -> Value {
    json!({
        "HotelName": "Sea Breeze Residency",
        "bookingUrl": "https://www.booking.com/hotel/in/sea-breeze-residency.html",
        "price": 3_400.0,
        "exact_location": "Calangute Beach Road, North Goa",
        "checkInTime": "14:00",
        "checkOutTime": "11:00",
    })
}

/// Steps of the demo plan; the last one yields the full travel plan.
pub fn travel_plan_steps() -> Vec<ScriptedStep> {
    vec![
        ScriptedStep::new("Search outbound flights", departure_flight())
            .with_name("$departure_flight")
            .with_tool("flight_search"),
        ScriptedStep::new("Search return flights", return_flight())
            .with_name("$return_flight")
            .with_tool("flight_search"),
        ScriptedStep::new("Search accommodation", accommodation())
            .with_name("$accommodation")
            .with_tool("hotel_search"),
        ScriptedStep::new(
            "Compile travel plan",
            json!({
                "departureFlight": departure_flight(),
                "returnFlight": return_flight(),
                "accommodation": accommodation(),
            }),
        )
        .with_summary("Round trip with accommodation"),
    ]
}

pub fn demo_engine(observer: Arc<dyn StepObserver>, step_delay: Duration) -> Arc<dyn PlanEngine> {
    Arc::new(
        ScriptedEngine::builder(observer)
            .steps(travel_plan_steps())
            .step_delay(step_delay)
            .run_prefix(DEMO_RUN_PREFIX)
            .build(),
    )
}

/// Start the synchronization runtime with the demo planner. Must be called
/// inside a tokio runtime.
pub fn start_runtime(config: &Config) -> Arc<PlanRunRuntime> {
    let step_delay = config.demo.step_delay();
    Arc::new(PlanRunRuntime::start(config.sync.clone(), move |observer| {
        demo_engine(observer, step_delay)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_step_matches_plan_output_shape() {
        let steps = travel_plan_steps();
        assert_eq!(steps.len(), 4);

        let names: Vec<_> = steps.iter().map(|step| step.output_name()).collect();
        assert_eq!(
            names,
            vec![
                Some("$departure_flight"),
                Some("$return_flight"),
                Some("$accommodation"),
                None
            ]
        );

        let plan = steps.last().map(|step| step.value().clone()).unwrap();
        for key in ["departureFlight", "returnFlight", "accommodation"] {
            assert!(plan.get(key).is_some(), "missing {key}");
        }
        assert!(plan["accommodation"]["HotelName"].is_string());
        assert!(
            plan["departureFlight"]["deepLinkUrl"]
                .as_str()
                .unwrap()
                .starts_with("https://www.skyscanner.co.in")
        );
    }
}
