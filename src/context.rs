//! Shared harvest context
//!
//! Built once at startup and handed to each component when it is
//! constructed.

use crate::config::Config;
use crate::telemetry::{FacadeMetrics, MetricsReporter};
use std::sync::Arc;

/// Configuration and metrics reporter shared by every component
#[derive(Clone)]
pub struct HarvestContext {
    pub config: Arc<Config>,
    pub metrics: Arc<dyn MetricsReporter>,
}

impl HarvestContext {
    pub fn new(config: Config, metrics: Arc<dyn MetricsReporter>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
        }
    }

    /// Context reporting through the `metrics` crate facade
    pub fn with_facade_metrics(config: Config) -> Self {
        Self::new(config, Arc::new(FacadeMetrics::new()))
    }
}

impl std::fmt::Debug for HarvestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
