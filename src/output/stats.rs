//! Per-run harvest statistics

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Counters for one project within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectStats {
    /// Search pages fetched successfully
    pub pages: u64,

    /// Search pages abandoned after a failed request
    pub failed_pages: u64,

    /// Search hits returned across all pages
    pub hits: u64,

    /// Hits older than the resume cursor, not fetched
    pub skipped_by_cursor: u64,

    /// Issues written to storage
    pub stored: u64,

    /// Issues already in the processed ledger
    pub duplicates: u64,

    /// Payloads dropped by the validator
    pub invalid: u64,

    /// Issues lost to fetch, validation or persistence failures
    pub failed: u64,
}

/// Statistics of one harvest run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestStats {
    pub projects: BTreeMap<String, ProjectStats>,
    pub elapsed: Duration,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of `project`, created on first use
    pub fn project_mut(&mut self, project: &str) -> &mut ProjectStats {
        self.projects.entry(project.to_string()).or_default()
    }

    pub fn project(&self, project: &str) -> ProjectStats {
        self.projects.get(project).copied().unwrap_or_default()
    }

    /// Sum of all project counters
    pub fn totals(&self) -> ProjectStats {
        self.projects
            .values()
            .fold(ProjectStats::default(), |mut acc, p| {
                acc.pages += p.pages;
                acc.failed_pages += p.failed_pages;
                acc.hits += p.hits;
                acc.skipped_by_cursor += p.skipped_by_cursor;
                acc.stored += p.stored;
                acc.duplicates += p.duplicates;
                acc.invalid += p.invalid;
                acc.failed += p.failed;
                acc
            })
    }
}

/// Formats `stats` as a plain-text table
pub fn render_summary(stats: &HarvestStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Harvest Summary ===\n");
    let _ = writeln!(
        out,
        "{:<16} {:>7} {:>7} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Project", "Pages", "Hits", "Skipped", "Stored", "Dupes", "Invalid", "Failed"
    );

    let mut row = |name: &str, p: &ProjectStats| {
        let _ = writeln!(
            out,
            "{:<16} {:>7} {:>7} {:>8} {:>8} {:>8} {:>8} {:>8}",
            name,
            p.pages,
            p.hits,
            p.skipped_by_cursor,
            p.stored,
            p.duplicates,
            p.invalid,
            p.failed + p.failed_pages
        );
    };
    for (project, p) in &stats.projects {
        row(project, p);
    }
    row("TOTAL", &stats.totals());

    let _ = writeln!(out, "\nElapsed: {:.1}s", stats.elapsed.as_secs_f64());
    out
}

/// Prints the run summary to stdout
pub fn print_summary(stats: &HarvestStats) {
    print!("{}", render_summary(stats));
}
