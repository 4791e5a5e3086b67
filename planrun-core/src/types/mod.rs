//! Domain types shared by the registry, the engine boundary, and transports.

pub mod ids;
pub mod request;
pub mod run_state;

pub use ids::RunId;
pub use request::PlanRequest;
pub use run_state::{RunPhase, RunState, StepOutputRecord};
