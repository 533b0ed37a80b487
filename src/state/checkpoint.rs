use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Per-project resume timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoints {
    entries: BTreeMap<String, DateTime<Utc>>,
    monotonic: bool,
}

impl Checkpoints {
    /// Creates an empty checkpoint map
    ///
    /// # Arguments
    ///
    /// * `monotonic` - Refuse writes older than the stored timestamp
    pub fn new(monotonic: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            monotonic,
        }
    }

    pub fn from_entries(entries: BTreeMap<String, DateTime<Utc>>, monotonic: bool) -> Self {
        Self { entries, monotonic }
    }

    pub fn get(&self, project: &str) -> Option<DateTime<Utc>> {
        self.entries.get(project).copied()
    }

    /// Records `timestamp` for `project` if the write is accepted
    ///
    /// Returns `true` when the stored value changed.
    pub fn advance(&mut self, project: &str, timestamp: DateTime<Utc>) -> bool {
        let current = self.get(project);
        if !accepts(project, current, timestamp, self.monotonic) || current == Some(timestamp) {
            return false;
        }
        self.entries.insert(project.to_string(), timestamp);
        true
    }

    pub fn entries(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.entries
    }

    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }
}

/// Whether a checkpoint write of `new` over `current` takes effect
///
/// Writes for an empty project never do. Without the monotonic guard the
/// last write wins, even if it moves the checkpoint backwards.
pub(crate) fn accepts(
    project: &str,
    current: Option<DateTime<Utc>>,
    new: DateTime<Utc>,
    monotonic: bool,
) -> bool {
    if project.is_empty() {
        tracing::warn!("Ignoring checkpoint write for an empty project");
        return false;
    }

    match current {
        Some(current) if monotonic && new < current => {
            tracing::warn!(
                project = project,
                stored = %current.to_rfc3339(),
                refused = %new.to_rfc3339(),
                "Refusing to move checkpoint backwards"
            );
            false
        }
        _ => true,
    }
}
