use thiserror::Error;

use crate::types::RunId;

/// Failure taxonomy of the synchronization engine.
///
/// Only [`RunError::SchedulingFailure`] and [`RunError::EngineFailure`] ever
/// reach a client, through a `FAILED` snapshot. Every other variant is a local
/// degradation that is logged and recovered from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("failed to schedule plan run: {0}")]
    SchedulingFailure(String),

    #[error("plan engine failed: {0}")]
    EngineFailure(String),

    #[error("output serialization failed: {0}")]
    SerializationFailure(String),

    #[error("notification delivery to subscriber {subscription} failed: channel closed")]
    NotificationDeliveryFailure { subscription: uuid::Uuid },

    #[error("fan-out queue saturated; dropped notification for run {run_id}")]
    QueueSaturation { run_id: RunId },

    #[error("fan-out queue closed; dropped notification for run {run_id}")]
    FanoutClosed { run_id: RunId },
}

/// Error raised across the engine boundary.
///
/// `Display` is exactly the engine's own message: a run that fails with
/// `Connection("timeout")` reports `"timeout"` as its error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    InvalidPlan(String),
}

/// Rejected start request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}
