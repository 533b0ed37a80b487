//! Jira-Harvest: incremental, resumable harvesting of Jira issues
//!
//! This crate pages through a rate-limited Jira REST API, validates every
//! fetched issue and persists it at most once, falling back to local storage
//! when the primary object store is unavailable. Per-project checkpoints and
//! a processed-key ledger let an interrupted harvest resume where it stopped.

pub mod config;
pub mod context;
pub mod crawler;
pub mod model;
pub mod output;
pub mod ratelimit;
pub mod retry;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod validation;

use thiserror::Error;

/// Main error type for Jira-Harvest operations
///
/// Every variant is scoped to the smallest unit of work that produced it
/// (one issue, one page, one project); none of them abort sibling work.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Request failed: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Validation error: {0}")]
    Validation(#[from] validation::ValidationError),

    #[error("Cannot determine project for issue {key}")]
    GroupResolution { key: String },

    #[error("Failed to persist {key} (primary: {primary}; fallback: {fallback})")]
    PersistenceFatal {
        key: String,
        primary: String,
        fallback: storage::StorageError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Jira-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use context::HarvestContext;
pub use model::{Attributes, Comment, Issue, IssueFields};
pub use storage::{PersistenceSink, StoreOutcome};
pub use validation::{ValidationMode, Validator};
