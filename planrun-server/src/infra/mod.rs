pub mod app_state;
pub mod config;
pub mod engine;
pub mod errors;
pub mod views;
pub mod websocket;
