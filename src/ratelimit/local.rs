use super::{acquire_with_wait, Acquire, BucketLimits, RateLimiter, TokenBucket};
use crate::config::RateLimitConfig;
use crate::telemetry::MetricsReporter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Buckets held in this process
///
/// Time is measured on the tokio clock, so paused-time tests can advance it.
pub struct LocalRateLimiter {
    limits: BucketLimits,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    origin: Instant,
    metrics: Arc<dyn MetricsReporter>,
}

impl LocalRateLimiter {
    pub fn new(config: &RateLimitConfig, metrics: Arc<dyn MetricsReporter>) -> Self {
        Self::with_limits(
            BucketLimits::new(config.burst, config.requests_per_second),
            metrics,
        )
    }

    pub fn with_limits(limits: BucketLimits, metrics: Arc<dyn MetricsReporter>) -> Self {
        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
            origin: Instant::now(),
            metrics,
        }
    }

    fn take(&self, identifier: &str) -> Acquire {
        let now = self.origin.elapsed().as_secs_f64();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets
            .entry(identifier.to_string())
            .or_insert_with(|| TokenBucket::full(&self.limits, now))
            .try_take(&self.limits, now)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn acquire(&self, identifier: &str, wait: bool) -> bool {
        acquire_with_wait(identifier, wait, self.metrics.as_ref(), || {
            std::future::ready(self.take(identifier))
        })
        .await
    }
}
