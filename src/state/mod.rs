//! Resumable harvest state
//!
//! Two pieces of state survive between runs:
//!
//! - **Checkpoints**: per-project timestamp of the newest issue stored, the
//!   lower bound of the next search for that project
//! - **Processed ledger**: bounded set of issue keys already stored, used to
//!   skip duplicates
//!
//! Both are reached through the [`StateStore`] trait. [`FileStateStore`]
//! keeps them in JSON files for a single process; [`SqliteStateStore`]
//! keeps them in one SQLite file that several worker processes can share.

mod checkpoint;
mod file;
mod processed;
mod schema;
mod sqlite;

pub use checkpoint::Checkpoints;
pub use file::FileStateStore;
pub use processed::ProcessedSet;
pub use sqlite::SqliteStateStore;

use crate::config::{StateBackend, StateConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by state store operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt state entry: {0}")]
    Corrupt(String),

    #[error("state store lock poisoned")]
    LockPoisoned,
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Checkpoint and processed-ledger storage
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateStore>`.
pub trait StateStore: Send + Sync {
    /// Checkpoint of `project`, or `None` if it has never been harvested
    fn last_update(&self, project: &str) -> StateResult<Option<DateTime<Utc>>>;

    /// Advances the checkpoint of `project` to `timestamp`
    ///
    /// Returns whether the write took effect. It does not for an empty
    /// project, or for a timestamp older than the stored one when the
    /// monotonic guard is enabled.
    fn set_last_update(&self, project: &str, timestamp: DateTime<Utc>) -> StateResult<bool>;

    fn is_processed(&self, issue_key: &str) -> StateResult<bool>;

    fn mark_processed(&self, issue_key: &str) -> StateResult<()>;

    /// All checkpoints, ordered by project
    fn checkpoints(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>>;

    /// Persists anything still buffered in memory
    fn flush(&self) -> StateResult<()>;
}

/// Opens the state store selected by `[state] backend`
pub fn open_state_store(config: &StateConfig) -> StateResult<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.backend {
        StateBackend::File => Arc::new(FileStateStore::from_config(config)?),
        StateBackend::Shared => Arc::new(SqliteStateStore::from_config(config)?),
    };
    Ok(store)
}
