//! Jira harvesting
//!
//! - [`JiraClient`] builds search and issue URLs and performs each call
//!   behind the rate limiter and retry policy
//! - [`Coordinator`] pages through every project, fetches each hit and
//!   feeds it through validation into the persistence sink

mod client;
mod coordinator;

pub use client::{build_http_client, build_jql, JiraClient, SearchHit, SearchPage, ISSUE_FIELDS};
pub use coordinator::{build_coordinator, Coordinator, HarvestOptions, ProjectPlan};

use crate::retry::RetryError;
use thiserror::Error;

/// Why a Jira call produced no data
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-success status outside the retryable set
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Response body was not the expected JSON
    #[error("malformed response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{url}: gave up after {attempts} attempts: {reason}")]
    Exhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
}

impl FetchError {
    pub(crate) fn from_retry(url: &str, err: RetryError<FetchError>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, reason } => FetchError::Exhausted {
                url: url.to_string(),
                attempts,
                reason,
            },
        }
    }
}
