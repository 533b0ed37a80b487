use super::{acquire_with_wait, Acquire, BucketLimits, RateLimiter};
use crate::config::RateLimitConfig;
use crate::state::SqliteStateStore;
use crate::telemetry::MetricsReporter;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Buckets stored in the shared state database
///
/// Refill and decrement happen in one database transaction, so workers in
/// different processes never spend the same token twice. If the database
/// cannot be used the request is granted and a warning logged.
///
/// Database calls run on the blocking pool, since a busy database can hold
/// a take for up to the busy timeout.
pub struct SharedRateLimiter {
    store: Arc<SqliteStateStore>,
    key_prefix: String,
    limits: BucketLimits,
    metrics: Arc<dyn MetricsReporter>,
}

impl SharedRateLimiter {
    pub fn new(
        store: Arc<SqliteStateStore>,
        config: &RateLimitConfig,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            limits: BucketLimits::new(config.burst, config.requests_per_second),
            metrics,
        }
    }

    async fn take(&self, key: &str) -> Acquire {
        let store = Arc::clone(&self.store);
        let limits = self.limits;
        let owned_key = key.to_string();
        let taken = tokio::task::spawn_blocking(move || {
            let now = Utc::now().timestamp_millis() as f64 / 1000.0;
            store.take_token(&owned_key, &limits, now)
        })
        .await;

        match taken {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(identifier = key, "Rate limit store unavailable, allowing request: {}", e);
                Acquire::Granted
            }
            Err(e) => {
                tracing::warn!(identifier = key, "Rate limit take did not complete, allowing request: {}", e);
                Acquire::Granted
            }
        }
    }
}

#[async_trait]
impl RateLimiter for SharedRateLimiter {
    async fn acquire(&self, identifier: &str, wait: bool) -> bool {
        let key = format!("{}{}", self.key_prefix, identifier);
        acquire_with_wait(identifier, wait, self.metrics.as_ref(), || self.take(&key)).await
    }
}
