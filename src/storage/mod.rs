//! Durable storage of harvested issues
//!
//! Issues are written as JSON objects to an [`ObjectStore`]: the configured
//! remote store first, the local filesystem when that fails. The
//! [`PersistenceSink`] ties this to the processed ledger and checkpoints so
//! each issue is stored at most once.

mod http;
mod local;
mod sink;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;
pub use sink::{object_path, PersistenceSink, StoreOutcome};

use async_trait::async_trait;
use thiserror::Error;

/// Content type of persisted issues
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors returned by object store writes
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store refused our credentials; retrying will not help
    #[error("credentials rejected: {0}")]
    Credentials(String),

    /// Timeout, connection failure or server-side error
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("write rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// Object path that would escape the store root
    #[error("invalid object path '{0}'")]
    InvalidPath(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_credentials(&self) -> bool {
        matches!(self, StorageError::Credentials(_))
    }
}

/// A bucket-addressed blob store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` under `path` in `bucket`
    ///
    /// # Returns
    ///
    /// Where the object ended up, for logging
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Short name used in log lines
    fn name(&self) -> &'static str;
}
