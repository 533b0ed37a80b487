use super::{HttpObjectStore, LocalObjectStore, ObjectStore, JSON_CONTENT_TYPE};
use crate::model::Issue;
use crate::state::StateStore;
use crate::telemetry::MetricsReporter;
use crate::{HarvestContext, HarvestError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of a successful [`PersistenceSink::store`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The issue was written
    Stored {
        location: String,
        /// Written to the local fallback rather than the primary store
        fallback: bool,
    },
    /// The issue key was already in the processed ledger; nothing written
    Duplicate,
}

/// Relative object path of an issue: `raw/{project}/{key}.json`
pub fn object_path(project: &str, key: &str) -> String {
    format!("raw/{}/{}.json", project, key)
}

/// Writes validated issues at most once and advances harvest state
///
/// Writes go to the primary object store when one is configured, else (or
/// when it fails) to the local fallback. A credential failure disables the
/// primary for the rest of the process.
pub struct PersistenceSink {
    primary: Option<Arc<dyn ObjectStore>>,
    fallback: Arc<dyn ObjectStore>,
    bucket: String,
    state: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsReporter>,
    primary_disabled: AtomicBool,
}

impl PersistenceSink {
    pub fn new(
        primary: Option<Arc<dyn ObjectStore>>,
        fallback: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        state: Arc<dyn StateStore>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            primary,
            fallback,
            bucket: bucket.into(),
            state,
            metrics,
            primary_disabled: AtomicBool::new(false),
        }
    }

    /// Builds the sink described by `[storage]`
    pub fn from_context(
        ctx: &HarvestContext,
        state: Arc<dyn StateStore>,
    ) -> Result<Self, HarvestError> {
        let storage = &ctx.config.storage;
        let timeout = Duration::from_secs(ctx.config.source.request_timeout);

        let primary = HttpObjectStore::from_config(storage, timeout)?
            .map(|store| Arc::new(store) as Arc<dyn ObjectStore>);
        if primary.is_none() {
            tracing::info!(
                root = %storage.local_root,
                "No object store endpoint configured, writing issues locally"
            );
        }

        Ok(Self::new(
            primary,
            Arc::new(LocalObjectStore::new(&storage.local_root)),
            storage.bucket.clone(),
            state,
            Arc::clone(&ctx.metrics),
        ))
    }

    /// Whether writes still go to the primary store
    pub fn primary_enabled(&self) -> bool {
        self.primary.is_some() && !self.primary_disabled.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Persists `issue` unless it was stored before
    ///
    /// # Returns
    ///
    /// [`StoreOutcome::Stored`] after a durable write, or
    /// [`StoreOutcome::Duplicate`] when the key is already processed.
    /// Fails with [`HarvestError::GroupResolution`] when no project can be
    /// determined and [`HarvestError::PersistenceFatal`] when both stores
    /// refuse the write.
    pub async fn store(&self, issue: &Issue) -> Result<StoreOutcome, HarvestError> {
        let project = issue
            .resolve_project()
            .ok_or_else(|| HarvestError::GroupResolution {
                key: issue.key.clone(),
            })?
            .to_string();

        if self.state.is_processed(&issue.key)? {
            tracing::debug!(issue_key = %issue.key, project = %project, "Already stored, skipping");
            return Ok(StoreOutcome::Duplicate);
        }

        let path = object_path(&project, &issue.key);
        let bytes = serde_json::to_vec_pretty(issue)?;
        let (location, fallback) = self.write(&issue.key, &project, &path, bytes).await?;

        self.state.mark_processed(&issue.key)?;
        self.state.set_last_update(&project, issue.updated_at())?;
        self.metrics.record_stored(&project);

        tracing::info!(
            issue_key = %issue.key,
            project = %project,
            location = %location,
            fallback = fallback,
            "Stored issue"
        );

        Ok(StoreOutcome::Stored { location, fallback })
    }

    async fn write(
        &self,
        key: &str,
        project: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<(String, bool), HarvestError> {
        let primary_error = match &self.primary {
            Some(primary) if !self.primary_disabled.load(Ordering::Relaxed) => {
                match primary
                    .put(&self.bucket, path, bytes.clone(), JSON_CONTENT_TYPE)
                    .await
                {
                    Ok(location) => return Ok((location, false)),
                    Err(e) => {
                        if e.is_credentials() {
                            self.primary_disabled.store(true, Ordering::Relaxed);
                            tracing::warn!(
                                store = primary.name(),
                                error = %e,
                                "Primary store rejected credentials, using local fallback from now on"
                            );
                        } else {
                            tracing::warn!(
                                issue_key = key,
                                project = project,
                                store = primary.name(),
                                error = %e,
                                "Primary store write failed, using local fallback"
                            );
                        }
                        e.to_string()
                    }
                }
            }
            Some(_) => "disabled after credential failure".to_string(),
            None => "not configured".to_string(),
        };

        match self
            .fallback
            .put(&self.bucket, path, bytes, JSON_CONTENT_TYPE)
            .await
        {
            Ok(location) => Ok((location, self.primary.is_some())),
            Err(fallback) => {
                tracing::error!(
                    issue_key = key,
                    project = project,
                    primary = %primary_error,
                    error = %fallback,
                    "Failed to persist issue"
                );
                Err(HarvestError::PersistenceFatal {
                    key: key.to_string(),
                    primary: primary_error,
                    fallback,
                })
            }
        }
    }
}

impl std::fmt::Debug for PersistenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("bucket", &self.bucket)
            .field("primary_enabled", &self.primary_enabled())
            .finish_non_exhaustive()
    }
}

/// Object store that refuses every write; for exercising failure paths
#[cfg(test)]
pub(crate) struct FailingStore {
    pub error: fn() -> super::StorageError,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
#[async_trait::async_trait]
impl ObjectStore for FailingStore {
    async fn put(
        &self,
        _bucket: &str,
        _path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, super::StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
