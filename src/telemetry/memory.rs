use super::MetricsReporter;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Point-in-time copy of the values held by [`InMemoryMetrics`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// project -> stored issues
    pub stored: BTreeMap<String, u64>,
    /// (project, status) -> calls
    pub calls: BTreeMap<(String, String), u64>,
    /// (project, kind) -> validation errors
    pub validation_errors: BTreeMap<(String, String), u64>,
    /// project -> observed waits in seconds
    pub rate_limit_waits: BTreeMap<String, Vec<f64>>,
}

impl MetricsSnapshot {
    pub fn stored_for(&self, project: &str) -> u64 {
        self.stored.get(project).copied().unwrap_or(0)
    }

    pub fn calls_for(&self, project: &str, status: &str) -> u64 {
        self.calls
            .get(&(project.to_string(), status.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn validation_errors_for(&self, project: &str, kind: &str) -> u64 {
        self.validation_errors
            .get(&(project.to_string(), kind.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_validation_errors(&self) -> u64 {
        self.validation_errors.values().sum()
    }
}

/// Keeps every reported value in memory
///
/// Used by tests and for the end-of-run summary.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl MetricsReporter for InMemoryMetrics {
    fn record_stored(&self, project: &str) {
        self.update(|m| *m.stored.entry(project.to_string()).or_default() += 1);
    }

    fn record_call(&self, project: &str, status: &str) {
        self.update(|m| {
            *m.calls
                .entry((project.to_string(), status.to_string()))
                .or_default() += 1
        });
    }

    fn record_validation_error(&self, project: &str, kind: &str) {
        self.update(|m| {
            *m.validation_errors
                .entry((project.to_string(), kind.to_string()))
                .or_default() += 1
        });
    }

    fn observe_rate_limit_wait(&self, project: &str, seconds: f64) {
        self.update(|m| {
            m.rate_limit_waits
                .entry(project.to_string())
                .or_default()
                .push(seconds)
        });
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsReporter for NoopMetrics {
    fn record_stored(&self, _project: &str) {}
    fn record_call(&self, _project: &str, _status: &str) {}
    fn record_validation_error(&self, _project: &str, _kind: &str) {}
    fn observe_rate_limit_wait(&self, _project: &str, _seconds: f64) {}
}
