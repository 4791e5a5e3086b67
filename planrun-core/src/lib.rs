//! # Planrun Core
//!
//! State synchronization engine for long-running, multi-step plan runs.
//!
//! ## Overview
//!
//! A plan run is started on behalf of a client, executed by an opaque
//! planning engine on a blocking worker, and observed by any number of
//! polling readers and realtime subscribers. This crate owns the
//! authoritative state of every run and keeps the two identifier namespaces
//! for the same run (the client-issued id and the engine-issued id) in sync.
//!
//! - **Run registry**: snapshots, identifier reconciliation, and live
//!   subscriber channels behind one synchronized component
//! - **Step ingestion**: the engine's per-step hook merges outputs into the
//!   running snapshot and never raises back into the engine
//! - **Fan-out**: a bounded, non-blocking queue drained by a single
//!   dispatcher task so slow subscribers never stall execution
//! - **Orchestration**: admission, supervised background execution, and the
//!   exactly-once terminal write
//!
//! ## Architecture
//!
//! - [`types`]: run snapshots, phases, identifiers, and the start request
//! - [`registry`]: [`RunRegistry`] and its store / reconciler / subscriber parts
//! - [`ingest`]: [`StepEventIngestor`], the engine-facing [`StepObserver`]
//! - [`fanout`]: [`FanoutQueue`] and [`FanoutDispatcher`]
//! - [`orchestrator`]: [`RunOrchestrator`]
//! - [`runtime`]: [`PlanRunRuntime`], which wires the pieces together
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use planrun_core::{
//!     PlanEngine, PlanRequest, PlanRunRuntime, ScriptedEngine, ScriptedStep, SyncConfig,
//! };
//!
//! # async fn demo() {
//! let runtime = PlanRunRuntime::start(SyncConfig::default(), |observer| {
//!     Arc::new(
//!         ScriptedEngine::builder(observer)
//!             .step(ScriptedStep::new("Search flights", serde_json::json!({"price": 420.0})))
//!             .build(),
//!     ) as Arc<dyn PlanEngine>
//! });
//!
//! let request = PlanRequest {
//!     origin: "Delhi".into(),
//!     destination: "Goa".into(),
//!     departure_date: "2025-09-01".into(),
//!     return_date: "2025-09-07".into(),
//!     cabin_class: "economy".into(),
//!     passengers: 2,
//! };
//! let started = runtime.start_run(&request);
//! println!("run {} is {}", started.run_id, started.snapshot.phase);
//! runtime.shutdown().await;
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod ingest;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod serialize;
pub mod types;

pub use config::SyncConfig;
pub use engine::{
    EnginePhase, EngineRun, FinalResult, PlanDescriptor, PlanEngine, PlanStep, StepObserver,
    scripted::{ScriptedEngine, ScriptedEngineBuilder, ScriptedStep},
};
pub use error::{EngineError, RunError, ValidationError};
pub use fanout::{FanoutDispatcher, FanoutQueue, FanoutStats, Notification};
pub use ingest::StepEventIngestor;
pub use orchestrator::{RunOrchestrator, StartedRun};
pub use registry::{
    RunRegistry,
    subscribers::{DispatchReport, Subscription},
};
pub use runtime::{PlanRunRuntime, RuntimeStats};
pub use serialize::{NamedOutput, OutputValue, SerializedValue, safe_serialize};
pub use types::{PlanRequest, RunId, RunPhase, RunState, StepOutputRecord};
