use std::time::Duration;

/// Capacity and refill rate shared by every bucket of a limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    /// Maximum number of tokens (burst size)
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl BucketLimits {
    pub fn new(burst: u32, requests_per_second: f64) -> Self {
        Self {
            capacity: f64::from(burst),
            refill_rate: requests_per_second.max(0.0),
        }
    }
}

/// Outcome of one refill-and-take step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquire {
    Granted,
    /// No token available. `wait` is how long until one will be, or `None`
    /// when the bucket never refills.
    Denied { wait: Option<Duration> },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }
}

/// Token count and last refill time of one identifier
///
/// Times are plain seconds on whatever clock the owner uses; the bucket
/// only ever looks at differences between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_refill: f64,
}

impl TokenBucket {
    /// A bucket holding `limits.capacity` tokens at time `now`
    pub fn full(limits: &BucketLimits, now: f64) -> Self {
        Self {
            tokens: limits.capacity,
            last_refill: now,
        }
    }

    /// Refills for the time elapsed since the last refill, then takes one
    /// token if available
    ///
    /// # Arguments
    ///
    /// * `limits` - Capacity and refill rate
    /// * `now` - Current time in seconds on the bucket's clock
    pub fn try_take(&mut self, limits: &BucketLimits, now: f64) -> Acquire {
        let elapsed = (now - self.last_refill).max(0.0);
        self.tokens = (self.tokens + elapsed * limits.refill_rate).min(limits.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Acquire::Granted;
        }

        // a wait too long to represent is as good as never
        let wait = if limits.refill_rate > 0.0 {
            Duration::try_from_secs_f64((1.0 - self.tokens) / limits.refill_rate).ok()
        } else {
            None
        };
        Acquire::Denied { wait }
    }
}
