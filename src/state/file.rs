use crate::config::StateConfig;
use crate::model::parse_timestamp;
use crate::state::{Checkpoints, ProcessedSet, StateError, StateResult, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const CHECKPOINT_FILE: &str = "checkpoints.json";
const PROCESSED_FILE: &str = "processed.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProcessedFile {
    issues: Vec<String>,
}

struct FileState {
    checkpoints: Checkpoints,
    processed: ProcessedSet,
    /// Marks since the processed file was last written
    unsaved: usize,
}

/// State kept in two JSON files owned by a single process
///
/// - `checkpoints.json`: `{"HADOOP": "2024-01-15T10:30:00+00:00", ...}`,
///   rewritten whenever a checkpoint changes
/// - `processed.json`: `{"issues": ["HADOOP-1", ...]}` oldest first,
///   rewritten every `flush_every` marks and on [`StateStore::flush`]
pub struct FileStateStore {
    dir: PathBuf,
    flush_every: usize,
    inner: Mutex<FileState>,
}

impl FileStateStore {
    /// Opens (or creates) the state directory and loads both files
    ///
    /// Missing or unreadable files start out empty.
    pub fn open(
        dir: &Path,
        processed_cap: usize,
        flush_every: usize,
        monotonic: bool,
    ) -> StateResult<Self> {
        fs::create_dir_all(dir)?;

        let checkpoints = Checkpoints::from_entries(load_checkpoints(dir), monotonic);
        let processed = ProcessedSet::from_keys(load_processed(dir), processed_cap);

        tracing::info!(
            dir = %dir.display(),
            checkpoints = checkpoints.entries().len(),
            processed = processed.len(),
            "Loaded harvest state"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            flush_every: flush_every.max(1),
            inner: Mutex::new(FileState {
                checkpoints,
                processed,
                unsaved: 0,
            }),
        })
    }

    pub fn from_config(config: &StateConfig) -> StateResult<Self> {
        Self::open(
            Path::new(&config.dir),
            config.processed_cap,
            config.flush_every,
            config.monotonic_checkpoint,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, FileState>> {
        self.inner.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn save_checkpoints(&self, checkpoints: &Checkpoints) -> StateResult<()> {
        let map: BTreeMap<&str, String> = checkpoints
            .entries()
            .iter()
            .map(|(project, ts)| (project.as_str(), ts.to_rfc3339()))
            .collect();
        write_atomic(&self.dir.join(CHECKPOINT_FILE), &serde_json::to_vec_pretty(&map)?)
    }

    fn save_processed(&self, processed: &ProcessedSet) -> StateResult<()> {
        let file = ProcessedFile {
            issues: processed.iter().map(str::to_string).collect(),
        };
        write_atomic(&self.dir.join(PROCESSED_FILE), &serde_json::to_vec_pretty(&file)?)
    }
}

impl StateStore for FileStateStore {
    fn last_update(&self, project: &str) -> StateResult<Option<DateTime<Utc>>> {
        Ok(self.lock()?.checkpoints.get(project))
    }

    fn set_last_update(&self, project: &str, timestamp: DateTime<Utc>) -> StateResult<bool> {
        let mut state = self.lock()?;
        if !state.checkpoints.advance(project, timestamp) {
            return Ok(false);
        }
        self.save_checkpoints(&state.checkpoints)?;
        tracing::debug!(project = project, checkpoint = %timestamp.to_rfc3339(), "Checkpoint advanced");
        Ok(true)
    }

    fn is_processed(&self, issue_key: &str) -> StateResult<bool> {
        Ok(self.lock()?.processed.contains(issue_key))
    }

    fn mark_processed(&self, issue_key: &str) -> StateResult<()> {
        let mut state = self.lock()?;
        if !state.processed.insert(issue_key.to_string()) {
            return Ok(());
        }

        state.unsaved += 1;
        if state.unsaved >= self.flush_every {
            self.save_processed(&state.processed)?;
            state.unsaved = 0;
        }
        Ok(())
    }

    fn checkpoints(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>> {
        Ok(self.lock()?.checkpoints.entries().clone())
    }

    fn flush(&self) -> StateResult<()> {
        let mut state = self.lock()?;
        self.save_checkpoints(&state.checkpoints)?;
        self.save_processed(&state.processed)?;
        state.unsaved = 0;
        Ok(())
    }
}

/// Writes `bytes` to a sibling temp file, then renames it over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json(path: &Path) -> Option<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Cannot read state file, starting empty: {}", e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Corrupt state file, starting empty: {}", e);
            None
        }
    }
}

/// Loads checkpoints, accepting RFC 3339 strings and epoch seconds
fn load_checkpoints(dir: &Path) -> BTreeMap<String, DateTime<Utc>> {
    let Some(Value::Object(map)) = read_json(&dir.join(CHECKPOINT_FILE)) else {
        return BTreeMap::new();
    };

    let mut entries = BTreeMap::new();
    for (project, raw) in map {
        let parsed = match &raw {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_f64().and_then(|secs| {
                DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
            }),
            _ => None,
        };
        match parsed {
            Some(ts) => {
                entries.insert(project, ts);
            }
            None => {
                tracing::warn!(project = %project, value = %raw, "Skipping unreadable checkpoint");
            }
        }
    }
    entries
}

fn load_processed(dir: &Path) -> Vec<String> {
    let Some(value) = read_json(&dir.join(PROCESSED_FILE)) else {
        return Vec::new();
    };

    match serde_json::from_value::<ProcessedFile>(value) {
        Ok(file) => file.issues,
        Err(e) => {
            tracing::warn!("Unexpected processed ledger layout, starting empty: {}", e);
            Vec::new()
        }
    }
}
