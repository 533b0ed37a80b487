//! Harvest metrics
//!
//! Components never touch a global metrics registry. They receive an
//! `Arc<dyn MetricsReporter>` through [`crate::HarvestContext`] and report
//! through it.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `jira_issues_scraped_total` | Counter | `project` |
//! | `jira_api_requests_total` | Counter | `project`, `status` |
//! | `jira_validation_errors_total` | Counter | `project`, `kind` |
//! | `jira_rate_limit_wait_seconds` | Histogram | `project` |
//!
//! Installing an exporter for the `metrics` facade is left to the embedding
//! application.

mod facade;
mod memory;

pub use facade::FacadeMetrics;
pub use memory::{InMemoryMetrics, MetricsSnapshot, NoopMetrics};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: issues durably stored.
    pub const ISSUES_SCRAPED_TOTAL: &str = "jira_issues_scraped_total";
    /// Counter: responses received from the Jira API.
    pub const API_REQUESTS_TOTAL: &str = "jira_api_requests_total";
    /// Counter: payloads rejected by the validator.
    pub const VALIDATION_ERRORS_TOTAL: &str = "jira_validation_errors_total";
    /// Histogram: time spent waiting for a rate-limit token, in seconds.
    pub const RATE_LIMIT_WAIT_SECONDS: &str = "jira_rate_limit_wait_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    pub const PROJECT: &str = "project";
    /// HTTP status code, or `error` for transport failures.
    pub const STATUS: &str = "status";
    /// Validation error kind (`missing_field`, `wrong_type`, `bad_timestamp`).
    pub const KIND: &str = "kind";
}

/// Sink for everything the harvester measures
pub trait MetricsReporter: Send + Sync {
    /// An issue was persisted for `project`
    fn record_stored(&self, project: &str);

    /// A Jira API call for `project` completed with `status`
    fn record_call(&self, project: &str, status: &str);

    /// A payload for `project` failed validation with `kind`
    fn record_validation_error(&self, project: &str, kind: &str);

    /// A caller for `project` waited `seconds` for a rate-limit token
    fn observe_rate_limit_wait(&self, project: &str, seconds: f64);
}
