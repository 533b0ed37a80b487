//! Shared SQLite state store
//!
//! One database file serves any number of harvester processes. Every
//! read-modify-write runs inside an `IMMEDIATE` transaction, which takes
//! the database write lock up front, so concurrent processes serialize on
//! it instead of interleaving.

use crate::config::StateConfig;
use crate::model::parse_timestamp;
use crate::ratelimit::{Acquire, BucketLimits, TokenBucket};
use crate::state::checkpoint::accepts;
use crate::state::schema::initialize_schema;
use crate::state::{StateError, StateResult, StateStore};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// State store backed by a SQLite database shared between processes
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    processed_cap: usize,
    processed_ttl: Duration,
    monotonic: bool,
}

impl SqliteStateStore {
    /// Opens or creates the shared database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Database file; parent directories are created
    /// * `processed_cap` - Maximum number of processed keys kept
    /// * `processed_ttl` - Lifetime of a processed key
    /// * `monotonic` - Refuse checkpoint writes older than the stored value
    pub fn open(
        path: &Path,
        processed_cap: usize,
        processed_ttl: Duration,
        monotonic: bool,
    ) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self::with_connection(conn, processed_cap, processed_ttl, monotonic))
    }

    pub fn from_config(config: &StateConfig) -> StateResult<Self> {
        Self::open(
            Path::new(&config.shared_path),
            config.processed_cap,
            Duration::days(i64::from(config.processed_ttl_days)),
            config.monotonic_checkpoint,
        )
    }

    /// Creates an in-memory store (for testing)
    pub fn in_memory(
        processed_cap: usize,
        processed_ttl: Duration,
        monotonic: bool,
    ) -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::with_connection(conn, processed_cap, processed_ttl, monotonic))
    }

    fn with_connection(
        conn: Connection,
        processed_cap: usize,
        processed_ttl: Duration,
        monotonic: bool,
    ) -> Self {
        Self {
            conn: Mutex::new(conn),
            processed_cap: processed_cap.max(1),
            processed_ttl,
            monotonic,
        }
    }

    fn lock_conn(&self) -> StateResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Atomically refills the bucket of `identifier` and takes one token
    ///
    /// A bucket seen for the first time starts full.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Bucket key (already prefixed by the caller)
    /// * `limits` - Capacity and refill rate
    /// * `now` - Current time in seconds since the Unix epoch
    pub fn take_token(
        &self,
        identifier: &str,
        limits: &BucketLimits,
        now: f64,
    ) -> StateResult<Acquire> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<(f64, f64)> = tx
            .query_row(
                "SELECT tokens, last_refill FROM rate_buckets WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let mut bucket = match stored {
            Some((tokens, last_refill)) => TokenBucket {
                tokens,
                last_refill,
            },
            None => TokenBucket::full(limits, now),
        };
        let outcome = bucket.try_take(limits, now);

        tx.execute(
            "INSERT INTO rate_buckets (identifier, tokens, last_refill) VALUES (?1, ?2, ?3)
             ON CONFLICT(identifier) DO UPDATE SET tokens = excluded.tokens, last_refill = excluded.last_refill",
            params![identifier, bucket.tokens, bucket.last_refill],
        )?;
        tx.commit()?;

        Ok(outcome)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> StateResult<()> {
        self.lock_conn()?.execute_batch(sql)?;
        Ok(())
    }
}

fn epoch_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

impl StateStore for SqliteStateStore {
    fn last_update(&self, project: &str) -> StateResult<Option<DateTime<Utc>>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_update FROM checkpoints WHERE project = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| StateError::Corrupt(format!("checkpoint of {}: '{}'", project, raw))),
        }
    }

    fn set_last_update(&self, project: &str, timestamp: DateTime<Utc>) -> StateResult<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT last_update FROM checkpoints WHERE project = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.as_deref().and_then(parse_timestamp);

        if !accepts(project, current, timestamp, self.monotonic) || current == Some(timestamp) {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO checkpoints (project, last_update, written_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(project) DO UPDATE SET last_update = excluded.last_update, written_at = excluded.written_at",
            params![project, timestamp.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn is_processed(&self, issue_key: &str) -> StateResult<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed WHERE issue_key = ?1 AND expires_at > ?2",
                params![issue_key, epoch_millis(Utc::now())],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_processed(&self, issue_key: &str) -> StateResult<()> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.processed_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM processed WHERE expires_at <= ?1",
            params![epoch_millis(now)],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO processed (issue_key, processed_at, expires_at) VALUES (?1, ?2, ?3)",
            params![issue_key, epoch_millis(now), epoch_millis(expires)],
        )?;
        let cap = i64::try_from(self.processed_cap).unwrap_or(i64::MAX);
        tx.execute(
            "DELETE FROM processed WHERE rowid IN (
                SELECT rowid FROM processed ORDER BY rowid DESC LIMIT -1 OFFSET ?1
            )",
            params![cap],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn checkpoints(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT project, last_update FROM checkpoints")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = BTreeMap::new();
        for row in rows {
            let (project, raw) = row?;
            match parse_timestamp(&raw) {
                Some(ts) => {
                    entries.insert(project, ts);
                }
                None => {
                    tracing::warn!(project = %project, value = %raw, "Skipping unreadable checkpoint");
                }
            }
        }
        Ok(entries)
    }

    fn flush(&self) -> StateResult<()> {
        // every write is committed as it happens
        Ok(())
    }
}
