//! Jira-Harvest main entry point
//!
//! This is the command-line interface for the Jira issue harvester.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use jira_harvest::config::{
    load_config_with_hash, validate_project_key, Config, LogFormat, LoggingConfig,
};
use jira_harvest::crawler::{build_coordinator, Coordinator, HarvestOptions};
use jira_harvest::output::print_summary;
use jira_harvest::state::open_state_store;
use jira_harvest::HarvestContext;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Jira-Harvest: incremental Jira issue harvester
///
/// Pages through the issues of each project oldest update first, stores
/// every issue once and records a per-project checkpoint so the next run
/// resumes where this one stopped.
#[derive(Parser, Debug)]
#[command(name = "jira-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Incremental, resumable Jira issue harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Projects to harvest (defaults to `[source] projects`)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    projects: Vec<String>,

    /// Harvest issues updated on or after this date, ignoring checkpoints
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_start_date)]
    start_date: Option<DateTime<Utc>>,

    /// Maximum issues fetched per project
    #[arg(long, value_name = "N")]
    max_issues: Option<usize>,

    /// Abort an issue on the first validation error instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Validate config and show where each project would resume
    #[arg(long, conflicts_with = "show_state")]
    dry_run: bool,

    /// Print stored checkpoints and exit
    #[arg(long, conflicts_with = "dry_run")]
    show_state: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_start_date(value: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid date: {}", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    setup_logging(cli.verbose, cli.quiet, &config.logging);
    tracing::info!(
        path = %cli.config.display(),
        hash = %config_hash,
        "Configuration loaded"
    );

    for project in &cli.projects {
        validate_project_key(project).context("Invalid --projects value")?;
    }
    if cli.strict {
        config.validation.strict = true;
    }

    if cli.show_state {
        return handle_show_state(&config);
    }

    let options = HarvestOptions {
        projects: cli.projects,
        start_date: cli.start_date,
        max_issues: cli.max_issues,
    };

    let ctx = HarvestContext::with_facade_metrics(config);
    let coordinator =
        build_coordinator(&ctx, options).context("Failed to initialize harvester")?;

    if cli.dry_run {
        return handle_dry_run(&ctx.config, &coordinator);
    }

    let stats = coordinator.run().await;
    if !cli.quiet {
        print_summary(&stats);
    }

    Ok(())
}

/// Sets up the tracing subscriber from verbosity flags and `[logging]`
fn setup_logging(verbose: u8, quiet: bool, logging: &LoggingConfig) {
    let level = logging.level.to_lowercase();
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new(format!("jira_harvest={},warn", level)),
            1 => EnvFilter::new("jira_harvest=debug,info"),
            2 => EnvFilter::new("jira_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .init(),
    }
}

/// Handles `--dry-run`: shows the configuration and each project's resume point
fn handle_dry_run(config: &Config, coordinator: &Coordinator) -> anyhow::Result<()> {
    println!("=== Jira-Harvest Dry Run ===\n");

    println!("Source:");
    println!("  Base URL: {}", config.source.base_url);
    println!("  Page size: {}", config.source.page_size);
    println!("  Max in flight: {}", config.source.max_in_flight);
    println!("  JQL margin: {} min", config.source.jql_margin_minutes);

    println!("\nRate limit:");
    println!(
        "  {} req/s, burst {} ({:?})",
        config.rate_limit.requests_per_second, config.rate_limit.burst, config.rate_limit.backend
    );

    println!("\nStorage:");
    match &config.storage.endpoint {
        Some(endpoint) => println!("  Primary: {}/{}", endpoint, config.storage.bucket),
        None => println!("  Primary: (none)"),
    }
    println!("  Local fallback: {}", config.storage.local_root);

    println!("\nProjects ({}):", coordinator.projects().len());
    let plan = coordinator
        .plan()
        .context("Failed to read harvest state")?;
    for entry in plan {
        let cursor = entry
            .cursor
            .map_or_else(|| "full backfill".to_string(), |c| c.to_rfc3339());
        println!("  - {} (from {})", entry.project, cursor);
        println!("    JQL: {}", entry.jql);
    }

    println!("\nDry run complete. No requests were made.");
    Ok(())
}

/// Handles `--show-state`: prints every stored checkpoint
fn handle_show_state(config: &Config) -> anyhow::Result<()> {
    let state = open_state_store(&config.state).context("Failed to open harvest state")?;
    let checkpoints = state.checkpoints().context("Failed to read checkpoints")?;

    println!("=== Harvest Checkpoints ({:?} backend) ===\n", config.state.backend);
    if checkpoints.is_empty() {
        println!("  (none)");
    }
    for (project, timestamp) in checkpoints {
        println!("  {:<16} {}", project, timestamp.to_rfc3339());
    }

    Ok(())
}
