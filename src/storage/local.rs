use super::{ObjectStore, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Writes objects below a local root directory
///
/// The bucket is ignored: an object at `path` lands at `{root}/{path}`, so
/// the local layout mirrors the remote one.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full filesystem path of the object stored at `path`
    ///
    /// Only plain relative paths are accepted; anything that could leave the
    /// root (`..`, an absolute path) is refused.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !plain {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        _bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = target.with_extension("json.part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;

        Ok(target.display().to_string())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
