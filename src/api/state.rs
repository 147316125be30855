//! Shared state handed to API handlers.

use crate::metrics::PipelineMetrics;
use crate::storage::Pool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<PipelineMetrics>,
    pub pool: Pool,
}

impl AppState {
    pub fn new(metrics: Arc<PipelineMetrics>, pool: Pool) -> Self {
        Self { metrics, pool }
    }
}
