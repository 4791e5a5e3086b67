pub mod handle_health;
pub mod handle_plan;
pub mod handle_websocket;

pub use handle_health::health_handler;
pub use handle_plan::{plan_state_handler, start_plan_handler};
pub use handle_websocket::plan_websocket_handler;
