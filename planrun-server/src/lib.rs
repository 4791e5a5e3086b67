//! # Planrun Server
//!
//! HTTP and WebSocket transport for plan runs.
//!
//! ## Overview
//!
//! - **Start**: `POST /plan/start` validates a travel request and answers
//!   `202 Accepted` with the initial snapshot while the engine runs in the
//!   background
//! - **Polling**: `GET /plan/{run_id}/state` resolves either the client id
//!   or the engine id of a run
//! - **Realtime**: `GET /plan/{run_id}/ws` pushes every new snapshot
//! - **Health**: `GET /health` reports runtime counters
//!
//! All run state lives in [`planrun_core`]; this crate only loads
//! configuration, wires the runtime, and exposes it over axum.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
