//! Application state shared across handlers and the scheduler

use std::sync::Arc;

use axum::extract::FromRef;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::config::Config;
use crate::services::coordinator::{start_coordinator, CoordinatorSummary};

pub type SharedSummary = Arc<RwLock<Option<CoordinatorSummary>>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub last_summary: SharedSummary,
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            last_summary: Arc::new(RwLock::new(None)),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Runs the coordinator once and keeps its summary. A tick that fires
    /// while the previous run is still going is skipped.
    pub async fn run_coordinator(&self) -> Option<CoordinatorSummary> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("previous coordinator run still in progress, skipping");
            return None;
        };
        let summary = start_coordinator(&self.config).await;
        self.record(summary.clone()).await;
        Some(summary)
    }

    pub async fn record(&self, summary: CoordinatorSummary) {
        *self.last_summary.write().await = Some(summary);
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for SharedSummary {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.last_summary.clone()
    }
}
