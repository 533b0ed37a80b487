//! Schema of the shared state database

/// SQL schema for the shared state database
pub const SCHEMA_SQL: &str = r#"
-- Resume timestamp per project
CREATE TABLE IF NOT EXISTS checkpoints (
    project TEXT PRIMARY KEY,
    last_update TEXT NOT NULL,
    written_at TEXT NOT NULL
);

-- Processed issue keys; rowid order is insertion order
CREATE TABLE IF NOT EXISTS processed (
    issue_key TEXT PRIMARY KEY,
    processed_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_expires ON processed(expires_at);

-- Token buckets of the shared rate limiter
CREATE TABLE IF NOT EXISTS rate_buckets (
    identifier TEXT PRIMARY KEY,
    tokens REAL NOT NULL,
    last_refill REAL NOT NULL
);
"#;

/// Initializes the database schema
///
/// Safe to run against an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
