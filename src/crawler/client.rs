//! Jira REST client
//!
//! Every call acquires a rate-limit token for its project, goes through
//! the retry policy and reports its response status as a metric.

use super::FetchError;
use crate::config::SourceConfig;
use crate::model::{format_jql_date, parse_timestamp};
use crate::ratelimit::RateLimiter;
use crate::retry::{parse_retry_after, CallFailure, RetryPolicy};
use crate::telemetry::MetricsReporter;
use crate::{HarvestContext, HarvestError};
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Issue fields requested from both endpoints
pub const ISSUE_FIELDS: &str = "summary,description,created,updated,status,priority,assignee,reporter,issuetype,resolution,resolutiondate,comment,project";

const EXPAND: &str = "renderedFields,names";

/// One page of `/rest/api/2/search`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchPage {
    pub start_at: u64,
    /// Page size the server actually applied
    pub max_results: u64,
    pub total: u64,
    pub issues: Vec<SearchHit>,
}

/// A search result; only enough to schedule the issue fetch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub fields: Value,
}

impl SearchHit {
    /// `fields.updated`, if present and parseable
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("updated")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }
}

/// Builds the HTTP client shared by all Jira calls
///
/// # Arguments
///
/// * `config` - The `[source]` configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &SourceConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Search query for `project`, oldest update first
///
/// Jira compares dates at minute precision in its own time zone, so the
/// lower bound is `margin` before `since`, rounded down. Callers skip hits
/// older than the exact cursor.
pub fn build_jql(project: &str, since: Option<&DateTime<Utc>>, margin: chrono::Duration) -> String {
    match since.and_then(|since| since.checked_sub_signed(margin)) {
        Some(bound) => format!(
            "project = {} AND updated >= \"{}\" ORDER BY updated ASC",
            project,
            format_jql_date(&bound)
        ),
        None => format!("project = {} ORDER BY updated ASC", project),
    }
}

/// Client for the Jira search and issue endpoints
pub struct JiraClient {
    http: Client,
    base: Url,
    page_size: u64,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
    metrics: Arc<dyn MetricsReporter>,
}

impl JiraClient {
    /// Creates a client for `[source] base-url`
    pub fn new(ctx: &HarvestContext, limiter: Arc<dyn RateLimiter>) -> Result<Self, HarvestError> {
        let source = &ctx.config.source;

        let mut base = Url::parse(&source.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: build_http_client(source)?,
            base,
            page_size: u64::from(source.page_size),
            limiter,
            retry: RetryPolicy::from_config(&ctx.config.retry),
            metrics: Arc::clone(&ctx.metrics),
        })
    }

    /// Requested page size
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn search_url(&self, jql: &str, start_at: u64, max_results: u64) -> Result<Url, HarvestError> {
        let mut url = self.base.join("rest/api/2/search")?;
        url.query_pairs_mut()
            .append_pair("jql", jql)
            .append_pair("startAt", &start_at.to_string())
            .append_pair("maxResults", &max_results.to_string())
            .append_pair("fields", ISSUE_FIELDS)
            .append_pair("expand", EXPAND);
        Ok(url)
    }

    pub fn issue_url(&self, key: &str) -> Result<Url, HarvestError> {
        let mut url = self.base.join(&format!("rest/api/2/issue/{}", key))?;
        url.query_pairs_mut()
            .append_pair("fields", ISSUE_FIELDS)
            .append_pair("expand", EXPAND);
        Ok(url)
    }

    /// Fetches one page of search results
    ///
    /// # Arguments
    ///
    /// * `project` - Rate-limit and metric identifier
    /// * `jql` - Query reused unchanged for every page of the project
    /// * `start_at` - Offset of the first hit
    /// * `max_results` - Requested page size
    pub async fn search(
        &self,
        project: &str,
        jql: &str,
        start_at: u64,
        max_results: u64,
    ) -> Result<SearchPage, HarvestError> {
        let url = self.search_url(jql, start_at, max_results)?;
        Ok(self.get_json(project, url).await?)
    }

    /// Fetches the full payload of one issue
    pub async fn fetch_issue(&self, project: &str, key: &str) -> Result<Value, HarvestError> {
        let url = self.issue_url(key)?;
        Ok(self.get_json(project, url).await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, project: &str, url: Url) -> Result<T, FetchError> {
        let label = url.to_string();
        self.retry
            .execute(&label, |attempt| self.attempt(project, url.clone(), attempt))
            .await
            .map_err(|e| FetchError::from_retry(&label, e))
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        project: &str,
        url: Url,
        attempt: u32,
    ) -> Result<T, CallFailure<FetchError>> {
        if !self.limiter.acquire(project, true).await {
            return Err(CallFailure::retryable("rate limit token not granted"));
        }

        tracing::debug!(url = %url, project = project, attempt = attempt, "Requesting");

        let response = match self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_call(project, "error");
                return Err(CallFailure::retryable(e.to_string()));
            }
        };

        let status = response.status();
        self.metrics.record_call(project, status.as_str());

        if !status.is_success() {
            if self.retry.is_retryable_status(status.as_u16()) {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                return Err(CallFailure::Retryable {
                    reason: format!("HTTP {}", status.as_u16()),
                    retry_after,
                });
            }
            return Err(CallFailure::Fatal(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CallFailure::retryable(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|source| {
            CallFailure::Fatal(FetchError::Body {
                url: url.to_string(),
                source,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ratelimit::{BucketLimits, LocalRateLimiter};
    use crate::telemetry::InMemoryMetrics;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_client(base_url: &str) -> (JiraClient, Arc<InMemoryMetrics>) {
        let mut config = Config::default();
        config.source.base_url = base_url.to_string();
        config.retry.max_retries = 2;
        config.retry.start_delay = 0.01;
        config.retry.max_delay = 0.05;

        let metrics = Arc::new(InMemoryMetrics::new());
        let ctx = HarvestContext::new(config, metrics.clone());
        let limiter = Arc::new(LocalRateLimiter::with_limits(
            BucketLimits::new(100, 1000.0),
            metrics.clone(),
        ));
        (JiraClient::new(&ctx, limiter).unwrap(), metrics)
    }

    #[test]
    fn test_build_jql() {
        let none = chrono::Duration::zero();
        assert_eq!(build_jql("HADOOP", None, none), "project = HADOOP ORDER BY updated ASC");

        let since = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        assert_eq!(
            build_jql("HADOOP", Some(&since), none),
            "project = HADOOP AND updated >= \"2024/01/15 10:30\" ORDER BY updated ASC"
        );
    }

    #[test]
    fn test_build_jql_widens_bound_by_margin() {
        let since = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        assert_eq!(
            build_jql("HADOOP", Some(&since), chrono::Duration::days(1)),
            "project = HADOOP AND updated >= \"2024/01/14 10:30\" ORDER BY updated ASC"
        );
        assert_eq!(
            build_jql("HADOOP", Some(&since), chrono::Duration::minutes(90)),
            "project = HADOOP AND updated >= \"2024/01/15 09:00\" ORDER BY updated ASC"
        );
    }

    #[test]
    fn test_urls_keep_base_path() {
        let (client, _) = create_client("https://issues.apache.org/jira");

        let search = client.search_url("project = HADOOP", 50, 25).unwrap();
        assert_eq!(search.path(), "/jira/rest/api/2/search");
        let pairs: Vec<(String, String)> = search.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("jql".to_string(), "project = HADOOP".to_string())));
        assert!(pairs.contains(&("startAt".to_string(), "50".to_string())));
        assert!(pairs.contains(&("maxResults".to_string(), "25".to_string())));
        assert!(pairs.contains(&("expand".to_string(), "renderedFields,names".to_string())));

        let issue = client.issue_url("HADOOP-1234").unwrap();
        assert_eq!(issue.path(), "/jira/rest/api/2/issue/HADOOP-1234");
    }

    #[test]
    fn test_search_hit_updated() {
        let hit: SearchHit = serde_json::from_value(json!({
            "key": "HADOOP-1",
            "fields": { "updated": "2024-01-15T10:30:00.000+0000" }
        }))
        .unwrap();
        assert_eq!(
            hit.updated(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        assert_eq!(SearchHit::default().updated(), None);
    }

    #[tokio::test]
    async fn test_search_parses_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 0,
                "maxResults": 2,
                "total": 5,
                "issues": [ { "key": "HADOOP-1", "fields": {} }, { "key": "HADOOP-2", "fields": {} } ]
            })))
            .mount(&server)
            .await;

        let (client, metrics) = create_client(&server.uri());
        let page = client.search("HADOOP", "project = HADOOP", 0, 50).await.unwrap();

        assert_eq!(page.max_results, 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.issues.len(), 2);
        assert_eq!(metrics.snapshot().calls_for("HADOOP", "200"), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/issue/HADOOP-1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/issue/HADOOP-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": "HADOOP-1" })))
            .mount(&server)
            .await;

        let (client, metrics) = create_client(&server.uri());
        let payload = client.fetch_issue("HADOOP", "HADOOP-1").await.unwrap();

        assert_eq!(payload["key"], "HADOOP-1");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.calls_for("HADOOP", "503"), 2);
        assert_eq!(snapshot.calls_for("HADOOP", "200"), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let (client, _) = create_client(&server.uri());
        let err = client.fetch_issue("HADOOP", "HADOOP-1").await.unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Fetch(FetchError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = create_client(&server.uri());
        let err = client.fetch_issue("HADOOP", "HADOOP-404").await.unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Fetch(FetchError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = create_client(&server.uri());
        let err = client.fetch_issue("HADOOP", "HADOOP-1").await.unwrap_err();

        assert!(matches!(err, HarvestError::Fetch(FetchError::Body { .. })));
    }
}
