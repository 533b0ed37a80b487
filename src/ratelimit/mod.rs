//! Token-bucket rate limiting
//!
//! Every outbound Jira call first acquires a token from the bucket of its
//! project. Buckets live either in this process ([`LocalRateLimiter`]) or
//! in the shared state database ([`SharedRateLimiter`]) so that several
//! workers draw from one budget.

mod bucket;
mod local;
mod shared;

pub use bucket::{Acquire, BucketLimits, TokenBucket};
pub use local::LocalRateLimiter;
pub use shared::SharedRateLimiter;

use crate::config::{RateLimitBackend, RateLimitConfig};
use crate::state::SqliteStateStore;
use crate::telemetry::MetricsReporter;
use crate::HarvestContext;
use async_trait::async_trait;
use std::sync::Arc;

/// Throttles outbound calls per identifier
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Takes one token for `identifier`
    ///
    /// When no token is available and `wait` is set, sleeps until one should
    /// be and tries exactly once more.
    ///
    /// # Returns
    ///
    /// `true` if the caller may proceed
    async fn acquire(&self, identifier: &str, wait: bool) -> bool;
}

/// Builds the limiter selected by `[rate-limit] backend`
///
/// The shared backend needs the shared state database; without one it
/// falls back to a local limiter.
pub fn build_rate_limiter(
    ctx: &HarvestContext,
    shared_store: Option<Arc<SqliteStateStore>>,
) -> Arc<dyn RateLimiter> {
    let config: &RateLimitConfig = &ctx.config.rate_limit;
    match (config.backend, shared_store) {
        (RateLimitBackend::Shared, Some(store)) => Arc::new(SharedRateLimiter::new(
            store,
            config,
            Arc::clone(&ctx.metrics),
        )),
        (RateLimitBackend::Shared, None) => {
            tracing::warn!("Shared rate limiting requested without a shared store, using local buckets");
            Arc::new(LocalRateLimiter::new(config, Arc::clone(&ctx.metrics)))
        }
        (RateLimitBackend::Local, _) => {
            Arc::new(LocalRateLimiter::new(config, Arc::clone(&ctx.metrics)))
        }
    }
}

/// Runs one take, then on a finite wait sleeps and takes once more
async fn acquire_with_wait<F, Fut>(
    identifier: &str,
    wait: bool,
    metrics: &dyn MetricsReporter,
    mut take: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Acquire>,
{
    let delay = match take().await {
        Acquire::Granted => return true,
        Acquire::Denied { wait: None } => {
            tracing::debug!(identifier = identifier, "Rate limit bucket does not refill");
            return false;
        }
        Acquire::Denied { wait: Some(delay) } => delay,
    };

    if !wait {
        return false;
    }

    tracing::debug!(
        identifier = identifier,
        wait_secs = delay.as_secs_f64(),
        "Rate limited, waiting for a token"
    );
    tokio::time::sleep(delay).await;
    metrics.observe_rate_limit_wait(identifier, delay.as_secs_f64());

    take().await.is_granted()
}
