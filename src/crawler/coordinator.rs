//! Harvest coordinator - the dispatch loop
//!
//! Work is an explicit queue of [`Task`]s. A page task fetches one page of
//! search results and queues one issue task per hit, plus the next page;
//! an issue task fetches the full issue, validates it and hands it to the
//! persistence sink. Tasks run concurrently up to `max-in-flight`, but
//! their results are handled one at a time by the loop itself.

use super::client::{build_jql, JiraClient, SearchPage};
use crate::config::{RateLimitBackend, StateBackend};
use crate::model::is_issue_key;
use crate::output::HarvestStats;
use crate::ratelimit::build_rate_limiter;
use crate::state::{FileStateStore, SqliteStateStore, StateStore};
use crate::storage::{PersistenceSink, StoreOutcome};
use crate::validation::Validator;
use crate::{HarvestContext, HarvestError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Stored issues between progress log lines, per project
const PROGRESS_INTERVAL: u64 = 50;

/// Per-run options, usually from the command line
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Projects to harvest; empty means `[source] projects`
    pub projects: Vec<String>,

    /// Lower bound overriding every stored checkpoint
    pub start_date: Option<DateTime<Utc>>,

    /// Maximum issues fetched per project in this run
    pub max_issues: Option<usize>,
}

/// Resume position of one project, as `--dry-run` reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPlan {
    pub project: String,
    pub cursor: Option<DateTime<Utc>>,
    pub jql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    Page {
        project: String,
        jql: String,
        start_at: u64,
        max_results: u64,
    },
    Issue {
        project: String,
        key: String,
    },
}

enum Outcome {
    Page {
        project: String,
        start_at: u64,
        result: Result<SearchPage, HarvestError>,
    },
    Issue {
        project: String,
        key: String,
        result: Result<Value, HarvestError>,
    },
}

struct ProjectRun {
    jql: String,
    cursor: Option<DateTime<Utc>>,
    scheduled: usize,
    limit_reached: bool,
}

/// Runs one task against Jira; owns everything it needs
fn dispatch(client: Arc<JiraClient>, task: Task) -> BoxFuture<'static, Outcome> {
    Box::pin(async move {
        match task {
            Task::Page {
                project,
                jql,
                start_at,
                max_results,
            } => {
                let result = client.search(&project, &jql, start_at, max_results).await;
                Outcome::Page {
                    project,
                    start_at,
                    result,
                }
            }
            Task::Issue { project, key } => {
                let result = client.fetch_issue(&project, &key).await;
                Outcome::Issue {
                    project,
                    key,
                    result,
                }
            }
        }
    })
}

/// Drives a harvest over a set of projects
pub struct Coordinator {
    client: Arc<JiraClient>,
    validator: Validator,
    sink: PersistenceSink,
    options: HarvestOptions,
    max_in_flight: usize,
    flush_every: usize,
    jql_margin: chrono::Duration,
    queue: VecDeque<Task>,
    /// Issue keys already queued in this run
    requested: HashSet<String>,
    runs: HashMap<String, ProjectRun>,
    stats: HarvestStats,
    stored_since_flush: usize,
}

impl Coordinator {
    /// Creates a coordinator from already-built components
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared harvest context
    /// * `client` - Jira client (carries the rate limiter and retry policy)
    /// * `validator` - Payload validator
    /// * `sink` - Persistence sink (carries the state store)
    /// * `options` - Per-run options
    pub fn new(
        ctx: &HarvestContext,
        client: JiraClient,
        validator: Validator,
        sink: PersistenceSink,
        mut options: HarvestOptions,
    ) -> Self {
        if options.projects.is_empty() {
            options.projects = ctx.config.source.projects.clone();
        }

        Self {
            client: Arc::new(client),
            validator,
            sink,
            options,
            max_in_flight: ctx.config.source.max_in_flight.max(1) as usize,
            flush_every: ctx.config.state.flush_every.max(1),
            jql_margin: chrono::Duration::minutes(i64::from(ctx.config.source.jql_margin_minutes)),
            queue: VecDeque::new(),
            requested: HashSet::new(),
            runs: HashMap::new(),
            stats: HarvestStats::new(),
            stored_since_flush: 0,
        }
    }

    pub fn projects(&self) -> &[String] {
        &self.options.projects
    }

    /// Where each project would resume, without calling Jira
    pub fn plan(&self) -> Result<Vec<ProjectPlan>, HarvestError> {
        self.options
            .projects
            .iter()
            .map(|project| {
                let cursor = self.resume_cursor(project)?;
                Ok(ProjectPlan {
                    project: project.clone(),
                    cursor,
                    jql: build_jql(project, cursor.as_ref(), self.jql_margin),
                })
            })
            .collect()
    }

    /// Explicit start date, else the stored checkpoint, else no bound
    fn resume_cursor(&self, project: &str) -> Result<Option<DateTime<Utc>>, HarvestError> {
        match self.options.start_date {
            Some(start) => Ok(Some(start)),
            None => Ok(self.sink.state().last_update(project)?),
        }
    }

    /// Runs the harvest until every project is exhausted or abandoned
    ///
    /// Failures are scoped to one page, issue or project and never stop the
    /// loop; they are counted in the returned statistics.
    pub async fn run(mut self) -> HarvestStats {
        let started = Instant::now();

        for project in self.options.projects.clone() {
            self.start_project(&project);
        }

        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.max_in_flight {
                let Some(task) = self.queue.pop_front() else {
                    break;
                };
                in_flight.push(dispatch(Arc::clone(&self.client), task));
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            self.handle(outcome).await;
        }

        self.flush_state();
        self.stats.elapsed = started.elapsed();

        let totals = self.stats.totals();
        tracing::info!(
            stored = totals.stored,
            duplicates = totals.duplicates,
            invalid = totals.invalid,
            failed = totals.failed,
            elapsed_secs = self.stats.elapsed.as_secs_f64(),
            "Harvest complete"
        );

        self.stats
    }

    fn start_project(&mut self, project: &str) {
        self.stats.project_mut(project);

        let cursor = match self.resume_cursor(project) {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::error!(project = project, error = %e, "Cannot read checkpoint, skipping project");
                return;
            }
        };

        let jql = build_jql(project, cursor.as_ref(), self.jql_margin);
        let cursor_label = cursor.map_or_else(|| "none".to_string(), |c| c.to_rfc3339());
        tracing::info!(
            project = project,
            cursor = %cursor_label,
            jql = %jql,
            "Starting project"
        );

        self.queue.push_back(Task::Page {
            project: project.to_string(),
            jql: jql.clone(),
            start_at: 0,
            max_results: self.client.page_size(),
        });
        self.runs.insert(
            project.to_string(),
            ProjectRun {
                jql,
                cursor,
                scheduled: 0,
                limit_reached: false,
            },
        );
    }

    async fn handle(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Page {
                project,
                start_at,
                result,
            } => self.handle_page(project, start_at, result),
            Outcome::Issue {
                project,
                key,
                result,
            } => self.handle_issue(project, key, result).await,
        }
    }

    fn handle_page(
        &mut self,
        project: String,
        start_at: u64,
        result: Result<SearchPage, HarvestError>,
    ) {
        let stats = self.stats.project_mut(&project);

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                stats.failed_pages += 1;
                tracing::error!(
                    project = %project,
                    start_at = start_at,
                    error = %e,
                    "Search failed, stopping project"
                );
                return;
            }
        };

        stats.pages += 1;
        stats.hits += page.issues.len() as u64;

        let Some(run) = self.runs.get_mut(&project) else {
            return;
        };

        if page.issues.is_empty() {
            tracing::info!(project = %project, start_at = start_at, "No more issues");
            return;
        }

        let fetched = page.issues.len() as u64;
        let max_issues = self.options.max_issues;

        for hit in page.issues {
            if max_issues.is_some_and(|max| run.scheduled >= max) {
                break;
            }
            if !is_issue_key(&hit.key) {
                tracing::warn!(
                    project = %project,
                    start_at = start_at,
                    issue_key = %hit.key,
                    "Search hit without a usable key"
                );
                continue;
            }
            if let (Some(cursor), Some(updated)) = (run.cursor, hit.updated()) {
                if updated < cursor {
                    stats.skipped_by_cursor += 1;
                    continue;
                }
            }
            if !self.requested.insert(hit.key.clone()) {
                tracing::debug!(issue_key = %hit.key, "Issue already requested");
                continue;
            }

            self.queue.push_back(Task::Issue {
                project: project.clone(),
                key: hit.key,
            });
            run.scheduled += 1;
        }

        if max_issues.is_some_and(|max| run.scheduled >= max) {
            run.limit_reached = true;
            tracing::info!(
                project = %project,
                scheduled = run.scheduled,
                "Reached max issues, abandoning remaining pages"
            );
            return;
        }

        let next = start_at + fetched;
        if next < page.total {
            let max_results = if page.max_results > 0 {
                page.max_results
            } else {
                self.client.page_size()
            };
            self.queue.push_back(Task::Page {
                project,
                jql: run.jql.clone(),
                start_at: next,
                max_results,
            });
        } else {
            tracing::info!(
                project = %project,
                total = page.total,
                "Finished paging"
            );
        }
    }

    async fn handle_issue(&mut self, project: String, key: String, result: Result<Value, HarvestError>) {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.project_mut(&project).failed += 1;
                tracing::error!(issue_key = %key, project = %project, error = %e, "Failed to fetch issue");
                return;
            }
        };

        let issue = match self.validator.validate(&payload) {
            Ok(Some(issue)) => issue,
            Ok(None) => {
                self.stats.project_mut(&project).invalid += 1;
                return;
            }
            Err(e) => {
                self.stats.project_mut(&project).failed += 1;
                tracing::error!(
                    issue_key = %key,
                    project = %project,
                    kind = e.kind.as_str(),
                    field = %e.field,
                    "Rejected invalid issue: {}",
                    e.message
                );
                return;
            }
        };

        if issue.key != key {
            self.stats.project_mut(&project).invalid += 1;
            tracing::warn!(
                issue_key = %key,
                project = %project,
                payload_key = %issue.key,
                "Issue payload carries a different key, dropping it"
            );
            return;
        }

        match self.sink.store(&issue).await {
            Ok(StoreOutcome::Stored { .. }) => {
                let stats = self.stats.project_mut(&project);
                stats.stored += 1;
                if stats.stored % PROGRESS_INTERVAL == 0 {
                    tracing::info!(project = %project, stored = stats.stored, "Progress");
                }

                self.stored_since_flush += 1;
                if self.stored_since_flush >= self.flush_every {
                    self.flush_state();
                }
            }
            Ok(StoreOutcome::Duplicate) => {
                self.stats.project_mut(&project).duplicates += 1;
            }
            Err(e) => {
                self.stats.project_mut(&project).failed += 1;
                tracing::error!(issue_key = %key, project = %project, error = %e, "Failed to store issue");
            }
        }
    }

    fn flush_state(&mut self) {
        self.stored_since_flush = 0;
        if let Err(e) = self.sink.state().flush() {
            tracing::error!(error = %e, "Failed to flush harvest state");
        }
    }
}

/// Wires up every component from the context
///
/// A shared SQLite store is opened when either the state or the rate-limit
/// backend is `shared`; both then use the same database.
pub fn build_coordinator(
    ctx: &HarvestContext,
    options: HarvestOptions,
) -> Result<Coordinator, HarvestError> {
    let config = &ctx.config;

    let shared = if config.state.backend == StateBackend::Shared
        || config.rate_limit.backend == RateLimitBackend::Shared
    {
        Some(Arc::new(SqliteStateStore::from_config(&config.state)?))
    } else {
        None
    };

    let state: Arc<dyn StateStore> = match (config.state.backend, &shared) {
        (StateBackend::Shared, Some(store)) => Arc::clone(store) as Arc<dyn StateStore>,
        _ => Arc::new(FileStateStore::from_config(&config.state)?),
    };

    let limiter = build_rate_limiter(ctx, shared);
    let client = JiraClient::new(ctx, limiter)?;
    let validator = Validator::from_context(ctx);
    let sink = PersistenceSink::from_context(ctx, state)?;

    Ok(Coordinator::new(ctx, client, validator, sink, options))
}
