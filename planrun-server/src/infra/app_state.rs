use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use planrun_core::PlanRunRuntime;

use super::config::Config;

/// Shared handler state: the synchronization runtime plus resolved
/// configuration.
#[derive(Clone)]
pub struct AppState {
    runtime: Arc<PlanRunRuntime>,
    config: Arc<Config>,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("server", &self.config.server)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(runtime: Arc<PlanRunRuntime>, config: Arc<Config>) -> Self {
        Self {
            runtime,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn runtime(&self) -> &Arc<PlanRunRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
