use super::{ObjectStore, StorageError};
use crate::config::StorageConfig;
use crate::HarvestError;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Object store reached with plain HTTP `PUT {endpoint}/{bucket}/{path}`
///
/// Works against S3-compatible gateways that accept bearer tokens or
/// anonymous writes.
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl HttpObjectStore {
    /// Creates a store for `endpoint`
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL of the store
    /// * `access_token` - Optional bearer token
    /// * `timeout` - Whole-request timeout
    pub fn new(
        endpoint: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }

    /// Builds the primary store from `[storage]`, if an endpoint is set
    pub fn from_config(
        config: &StorageConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, HarvestError> {
        match &config.endpoint {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint,
                config.access_token.clone(),
                timeout,
            )?)),
            None => Ok(None),
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> Result<Url, StorageError> {
        self.endpoint
            .join(&format!("{}/{}", bucket, path))
            .map_err(|e| StorageError::Transient(format!("invalid object url: {}", e)))
    }
}

/// Maps a non-success status to the storage error taxonomy
fn classify_status(status: StatusCode) -> StorageError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::Credentials(format!("HTTP {}", status.as_u16()))
        }
        s if s.is_server_error()
            || s == StatusCode::REQUEST_TIMEOUT
            || s == StatusCode::TOO_MANY_REQUESTS =>
        {
            StorageError::Transient(format!("HTTP {}", s.as_u16()))
        }
        s => StorageError::Rejected { status: s.as_u16() },
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let url = self.object_url(bucket, path)?;

        let mut request = self
            .client
            .put(url.clone())
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(url.to_string())
        } else {
            Err(classify_status(status))
        }
    }

    fn name(&self) -> &'static str {
        "object-store"
    }
}
