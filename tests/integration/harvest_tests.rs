//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for both Jira and the object store
//! and run complete harvests against them.

use chrono::{TimeZone, Utc};
use jira_harvest::config::{Config, RateLimitBackend, StateBackend};
use jira_harvest::crawler::{build_coordinator, HarvestOptions};
use jira_harvest::state::{FileStateStore, SqliteStateStore, StateStore};
use jira_harvest::telemetry::InMemoryMetrics;
use jira_harvest::{HarvestContext, Issue};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointed at the mock server
fn create_test_config(jira: &MockServer, dir: &Path) -> Config {
    let mut config = Config::default();
    config.source.base_url = jira.uri();
    config.source.projects = vec!["HADOOP".to_string()];
    config.source.page_size = 2;
    config.rate_limit.requests_per_second = 1000.0;
    config.rate_limit.burst = 100;
    config.retry.start_delay = 0.01;
    config.retry.max_delay = 0.05;
    config.storage.local_root = dir.join("data").to_string_lossy().into_owned();
    config.state.dir = dir.join("state").to_string_lossy().into_owned();
    config.state.shared_path = dir.join("state/shared.db").to_string_lossy().into_owned();
    config
}

fn create_context(config: Config) -> (HarvestContext, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    (HarvestContext::new(config, metrics.clone()), metrics)
}

fn issue_payload(key: &str, updated: &str, comment_body: &str) -> Value {
    json!({
        "key": key,
        "fields": {
            "summary": format!("Problem in {}", key),
            "description": "Steps to reproduce",
            "created": "2024-01-01T09:00:00.000+0000",
            "updated": updated,
            "status": { "name": "Resolved" },
            "priority": { "name": "Major" },
            "assignee": { "name": "bob", "displayName": "Bob" },
            "reporter": { "name": "alice", "displayName": "Alice" },
            "issuetype": { "name": "Bug" },
            "resolution": { "name": "Fixed" },
            "resolutiondate": updated,
            "project": { "key": "HADOOP" },
            "comment": {
                "comments": [
                    {
                        "id": "10001",
                        "author": { "name": "bob", "displayName": "Bob" },
                        "body": comment_body,
                        "created": "2024-01-02T09:00:00.000+0000"
                    }
                ]
            }
        }
    })
}

fn hit(key: &str, updated: &str) -> Value {
    json!({ "key": key, "fields": { "updated": updated } })
}

async fn mount_search_page(jira: &MockServer, start_at: u64, total: u64, hits: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param("startAt", start_at.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": start_at,
            "maxResults": 2,
            "total": total,
            "issues": hits,
        })))
        .mount(jira)
        .await;
}

async fn mount_issue(jira: &MockServer, key: &str, updated: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/api/2/issue/{}", key)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(issue_payload(key, updated, "Applied the patch")),
        )
        .mount(jira)
        .await;
}

fn stored_file(dir: &Path, key: &str) -> std::path::PathBuf {
    dir.join("data/raw/HADOOP").join(format!("{}.json", key))
}

#[tokio::test]
async fn test_full_harvest_single_project() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(
        &jira,
        0,
        3,
        vec![
            hit("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
            hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ],
    )
    .await;
    mount_search_page(&jira, 2, 3, vec![hit("HADOOP-3", "2024-01-12T10:00:00.000+0000")]).await;
    mount_issue(&jira, "HADOOP-1", "2024-01-10T10:00:00.000+0000").await;
    mount_issue(&jira, "HADOOP-2", "2024-01-11T10:00:00.000+0000").await;
    mount_issue(&jira, "HADOOP-3", "2024-01-12T10:00:00.000+0000").await;

    let (ctx, metrics) = create_context(create_test_config(&jira, dir.path()));
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    let hadoop = stats.project("HADOOP");
    assert_eq!(hadoop.pages, 2);
    assert_eq!(hadoop.hits, 3);
    assert_eq!(hadoop.stored, 3);
    assert_eq!(hadoop.failed, 0);

    for key in ["HADOOP-1", "HADOOP-2", "HADOOP-3"] {
        assert!(stored_file(dir.path(), key).exists(), "{} not stored", key);
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.stored_for("HADOOP"), 3);
    assert_eq!(snapshot.calls_for("HADOOP", "200"), 5);

    let state = FileStateStore::open(&dir.path().join("state"), 100, 1, false).unwrap();
    assert_eq!(
        state.last_update("HADOOP").unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 1, 12, 10, 0, 0).unwrap())
    );
    assert!(state.is_processed("HADOOP-3").unwrap());
}

#[tokio::test]
async fn test_resume_skips_issues_older_than_checkpoint() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    {
        let state = FileStateStore::open(&dir.path().join("state"), 100, 1, false).unwrap();
        state
            .set_last_update("HADOOP", Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap())
            .unwrap();
        state.flush().unwrap();
    }

    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param(
            "jql",
            "project = HADOOP AND updated >= \"2024/01/09 12:00\" ORDER BY updated ASC",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 0,
            "maxResults": 2,
            "total": 2,
            "issues": [
                hit("HADOOP-1", "2024-01-10T11:59:00.000+0000"),
                hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
            ],
        })))
        .expect(1)
        .mount(&jira)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/HADOOP-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&jira)
        .await;
    mount_issue(&jira, "HADOOP-2", "2024-01-11T10:00:00.000+0000").await;

    let (ctx, _) = create_context(create_test_config(&jira, dir.path()));
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    let hadoop = stats.project("HADOOP");
    assert_eq!(hadoop.skipped_by_cursor, 1);
    assert_eq!(hadoop.stored, 1);
    assert!(!stored_file(dir.path(), "HADOOP-1").exists());
    assert!(stored_file(dir.path(), "HADOOP-2").exists());
}

#[tokio::test]
async fn test_widened_bound_still_fetches_issue_just_after_checkpoint() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    {
        let state = FileStateStore::open(&dir.path().join("state"), 100, 1, false).unwrap();
        state
            .set_last_update("HADOOP", Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap())
            .unwrap();
        state.flush().unwrap();
    }

    // a server five hours west of UTC reads the bound as local time
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param(
            "jql",
            "project = HADOOP AND updated >= \"2024/01/10 07:00\" ORDER BY updated ASC",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 0,
            "maxResults": 2,
            "total": 2,
            "issues": [
                hit("HADOOP-7", "2024-01-10T11:30:00.000+0000"),
                hit("HADOOP-8", "2024-01-10T12:00:30.000+0000"),
            ],
        })))
        .expect(1)
        .mount(&jira)
        .await;
    mount_issue(&jira, "HADOOP-8", "2024-01-10T12:00:30.000+0000").await;

    let mut config = create_test_config(&jira, dir.path());
    config.source.jql_margin_minutes = 300;
    let (ctx, _) = create_context(config);
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    let hadoop = stats.project("HADOOP");
    assert_eq!(hadoop.skipped_by_cursor, 1);
    assert_eq!(hadoop.stored, 1);
    assert!(stored_file(dir.path(), "HADOOP-8").exists());
}

#[tokio::test]
async fn test_second_run_reports_duplicates_with_one_write() {
    let jira = MockServer::start().await;
    let store = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(
        &jira,
        0,
        2,
        vec![
            hit("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
            hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ],
    )
    .await;
    mount_issue(&jira, "HADOOP-1", "2024-01-10T10:00:00.000+0000").await;
    mount_issue(&jira, "HADOOP-2", "2024-01-11T10:00:00.000+0000").await;

    Mock::given(method("PUT"))
        .and(path("/corpus/raw/HADOOP/HADOOP-1.json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;
    Mock::given(method("PUT"))
        .and(path("/corpus/raw/HADOOP/HADOOP-2.json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    let mut config = create_test_config(&jira, dir.path());
    config.storage.endpoint = Some(store.uri());
    config.storage.bucket = "corpus".to_string();

    let options = HarvestOptions {
        start_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..HarvestOptions::default()
    };

    let (ctx, _) = create_context(config.clone());
    let first = build_coordinator(&ctx, options.clone()).unwrap().run().await;
    assert_eq!(first.project("HADOOP").stored, 2);

    let (ctx, _) = create_context(config);
    let second = build_coordinator(&ctx, options).unwrap().run().await;
    assert_eq!(second.project("HADOOP").stored, 0);
    assert_eq!(second.project("HADOOP").duplicates, 2);
}

#[tokio::test]
async fn test_page_retried_after_server_errors() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&jira)
        .await;
    mount_search_page(&jira, 0, 1, vec![hit("HADOOP-1", "2024-01-10T10:00:00.000+0000")]).await;
    mount_issue(&jira, "HADOOP-1", "2024-01-10T10:00:00.000+0000").await;

    let (ctx, metrics) = create_context(create_test_config(&jira, dir.path()));
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    assert_eq!(stats.project("HADOOP").pages, 1);
    assert_eq!(stats.project("HADOOP").failed_pages, 0);
    assert_eq!(stats.project("HADOOP").stored, 1);
    assert_eq!(metrics.snapshot().calls_for("HADOOP", "500"), 2);
}

#[tokio::test]
async fn test_credential_failure_switches_to_local_fallback() {
    let jira = MockServer::start().await;
    let store = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(
        &jira,
        0,
        3,
        vec![
            hit("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
            hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ],
    )
    .await;
    mount_search_page(&jira, 2, 3, vec![hit("HADOOP-3", "2024-01-12T10:00:00.000+0000")]).await;
    mount_issue(&jira, "HADOOP-1", "2024-01-10T10:00:00.000+0000").await;
    mount_issue(&jira, "HADOOP-2", "2024-01-11T10:00:00.000+0000").await;
    mount_issue(&jira, "HADOOP-3", "2024-01-12T10:00:00.000+0000").await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&store)
        .await;

    let mut config = create_test_config(&jira, dir.path());
    config.storage.endpoint = Some(store.uri());
    config.storage.access_token = Some("expired".to_string());

    let (ctx, _) = create_context(config);
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    assert_eq!(stats.project("HADOOP").stored, 3);
    for key in ["HADOOP-1", "HADOOP-2", "HADOOP-3"] {
        assert!(stored_file(dir.path(), key).exists());
    }
}

#[tokio::test]
async fn test_stored_issue_round_trips() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(&jira, 0, 1, vec![hit("HADOOP-1234", "2024-01-15T10:30:00.000+0000")]).await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/HADOOP-1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_payload(
            "HADOOP-1234",
            "2024-01-15T10:30:00.000+0000",
            "Root cause was a race; attached a patch",
        )))
        .mount(&jira)
        .await;

    let (ctx, _) = create_context(create_test_config(&jira, dir.path()));
    build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    let bytes = std::fs::read(stored_file(dir.path(), "HADOOP-1234")).unwrap();
    let issue: Issue = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(issue.key, "HADOOP-1234");
    assert_eq!(issue.project, "HADOOP");
    assert_eq!(issue.fields.status.name(), "Resolved");
    assert_eq!(issue.fields.assignee.display_name(), "Bob");
    assert_eq!(issue.comments.len(), 1);
    assert_eq!(issue.comments[0].id, "10001");
    assert!(issue.comments[0].body.contains("patch"));
    assert_eq!(issue.resolution_comments(3).len(), 1);

    let reserialized = serde_json::to_vec_pretty(&issue).unwrap();
    assert_eq!(reserialized, bytes);
}

#[tokio::test]
async fn test_max_issues_abandons_remaining_pages() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(
        &jira,
        0,
        10,
        vec![
            hit("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
            hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ],
    )
    .await;
    mount_search_page(
        &jira,
        2,
        10,
        vec![
            hit("HADOOP-3", "2024-01-12T10:00:00.000+0000"),
            hit("HADOOP-4", "2024-01-13T10:00:00.000+0000"),
        ],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param("startAt", "4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&jira)
        .await;
    for (key, updated) in [
        ("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
        ("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ("HADOOP-3", "2024-01-12T10:00:00.000+0000"),
    ] {
        mount_issue(&jira, key, updated).await;
    }
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/HADOOP-4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&jira)
        .await;

    let (ctx, _) = create_context(create_test_config(&jira, dir.path()));
    let options = HarvestOptions {
        max_issues: Some(3),
        ..HarvestOptions::default()
    };
    let stats = build_coordinator(&ctx, options).unwrap().run().await;

    assert_eq!(stats.project("HADOOP").pages, 2);
    assert_eq!(stats.project("HADOOP").stored, 3);
}

#[tokio::test]
async fn test_shared_backends_use_one_database() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(&jira, 0, 1, vec![hit("HADOOP-1", "2024-01-10T10:00:00.000+0000")]).await;
    mount_issue(&jira, "HADOOP-1", "2024-01-10T10:00:00.000+0000").await;

    let mut config = create_test_config(&jira, dir.path());
    config.state.backend = StateBackend::Shared;
    config.rate_limit.backend = RateLimitBackend::Shared;
    let shared_path = config.state.shared_path.clone();

    let (ctx, _) = create_context(config);
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;
    assert_eq!(stats.project("HADOOP").stored, 1);

    let other_worker =
        SqliteStateStore::open(Path::new(&shared_path), 100, chrono::Duration::days(30), false)
            .unwrap();
    assert!(other_worker.is_processed("HADOOP-1").unwrap());
    assert_eq!(
        other_worker.last_update("HADOOP").unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_failed_issue_does_not_stop_siblings() {
    let jira = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search_page(
        &jira,
        0,
        2,
        vec![
            hit("HADOOP-1", "2024-01-10T10:00:00.000+0000"),
            hit("HADOOP-2", "2024-01-11T10:00:00.000+0000"),
        ],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/HADOOP-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&jira)
        .await;
    mount_issue(&jira, "HADOOP-2", "2024-01-11T10:00:00.000+0000").await;

    let (ctx, _) = create_context(create_test_config(&jira, dir.path()));
    let stats = build_coordinator(&ctx, HarvestOptions::default())
        .unwrap()
        .run()
        .await;

    assert_eq!(stats.project("HADOOP").failed, 1);
    assert_eq!(stats.project("HADOOP").stored, 1);
}
