use serde::Deserialize;

/// Main configuration structure for Jira-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream Jira instance and pagination settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the Jira instance (e.g. "https://issues.apache.org/jira")
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Project keys harvested when none are given on the command line
    pub projects: Vec<String>,

    /// Requested page size for search calls
    #[serde(rename = "page-size")]
    pub page_size: u32,

    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,

    /// Maximum number of requests in flight against the source
    #[serde(rename = "max-in-flight")]
    pub max_in_flight: u32,

    /// How far before the checkpoint the JQL lower bound is placed (minutes)
    ///
    /// Jira reads JQL dates in the server's time zone, not UTC. Hits older
    /// than the checkpoint are still skipped locally.
    #[serde(rename = "jql-margin-minutes")]
    pub jql_margin_minutes: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://issues.apache.org/jira".to_string(),
            projects: vec!["HADOOP".to_string(), "SPARK".to_string(), "KAFKA".to_string()],
            page_size: 50,
            user_agent: "jira-harvest/1.0".to_string(),
            request_timeout: 30,
            max_in_flight: 1,
            jql_margin_minutes: 1440,
        }
    }
}

/// Where token buckets live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// In-process buckets
    Local,
    /// Buckets in the shared SQLite store, visible to every worker process
    Shared,
}

/// Token bucket settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Refill rate per project (tokens per second)
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: f64,

    /// Bucket capacity
    pub burst: u32,

    pub backend: RateLimitBackend,

    /// Prefix applied to bucket identifiers in the shared store
    #[serde(rename = "key-prefix")]
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 0.28,
            burst: 1,
            backend: RateLimitBackend::Local,
            key_prefix: "jira:ratelimit:".to_string(),
        }
    }
}

/// Retry and backoff settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay before the first retry (seconds)
    #[serde(rename = "start-delay")]
    pub start_delay: f64,

    /// Upper bound for any single delay (seconds)
    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    #[serde(rename = "exponential-base")]
    pub exponential_base: f64,

    /// Status codes treated as transient
    #[serde(rename = "http-codes")]
    pub http_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            start_delay: 1.0,
            max_delay: 300.0,
            exponential_base: 2.0,
            http_codes: vec![500, 502, 503, 504, 522, 524, 408, 429],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Fail the item on validation errors instead of logging and skipping it
    pub strict: bool,
}

/// Primary object store and local fallback
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,

    /// Object store endpoint; when absent every record goes to local storage
    pub endpoint: Option<String>,

    /// Bearer token sent to the object store
    #[serde(rename = "access-token")]
    pub access_token: Option<String>,

    /// Root directory of the local fallback
    #[serde(rename = "local-root")]
    pub local_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "jira-llm-corpus".to_string(),
            endpoint: None,
            access_token: None,
            local_root: "data".to_string(),
        }
    }
}

/// Where checkpoints and the processed-key ledger live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON files in `dir`, owned by a single process
    File,
    /// SQLite database at `shared-path`, safe across processes
    Shared,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,

    pub dir: String,

    #[serde(rename = "shared-path")]
    pub shared_path: String,

    /// Maximum number of processed keys retained
    #[serde(rename = "processed-cap")]
    pub processed_cap: usize,

    /// Expiry of processed keys in the shared store (days)
    #[serde(rename = "processed-ttl-days")]
    pub processed_ttl_days: u32,

    /// Flush the ledger after this many newly processed keys
    #[serde(rename = "flush-every")]
    pub flush_every: usize,

    /// Refuse checkpoint writes older than the stored value
    #[serde(rename = "monotonic-checkpoint")]
    pub monotonic_checkpoint: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            dir: "data/state".to_string(),
            shared_path: "data/state/shared.db".to_string(),
            processed_cap: 10_000,
            processed_ttl_days: 30,
            flush_every: 100,
            monotonic_checkpoint: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
