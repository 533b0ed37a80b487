use super::{labels, names, MetricsReporter};
use ::metrics::{counter, histogram};

/// Reports through the `metrics` crate facade
///
/// Without an installed recorder every call is a no-op, so this is safe to
/// use unconditionally.
#[derive(Debug, Clone, Default)]
pub struct FacadeMetrics;

impl FacadeMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsReporter for FacadeMetrics {
    fn record_stored(&self, project: &str) {
        counter!(
            names::ISSUES_SCRAPED_TOTAL,
            labels::PROJECT => project.to_string(),
        )
        .increment(1);
    }

    fn record_call(&self, project: &str, status: &str) {
        counter!(
            names::API_REQUESTS_TOTAL,
            labels::PROJECT => project.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    fn record_validation_error(&self, project: &str, kind: &str) {
        counter!(
            names::VALIDATION_ERRORS_TOTAL,
            labels::PROJECT => project.to_string(),
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    fn observe_rate_limit_wait(&self, project: &str, seconds: f64) {
        histogram!(
            names::RATE_LIMIT_WAIT_SECONDS,
            labels::PROJECT => project.to_string(),
        )
        .record(seconds);
    }
}
