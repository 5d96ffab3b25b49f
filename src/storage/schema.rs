//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the policy catalog.
//! Timestamps are stored as fixed-width RFC 3339 UTC text so that string
//! comparison orders them chronologically.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per repository that has ever contributed a policy document
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name TEXT NOT NULL,
    stars INTEGER NOT NULL DEFAULT 0,
    forks INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    url TEXT NOT NULL,
    pushed_at TEXT,
    last_crawled_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_repositories_last_crawled ON repositories(last_crawled_at);
CREATE INDEX IF NOT EXISTS idx_repositories_stars ON repositories(stars);

-- Policy files, keyed by (repository, path)
CREATE TABLE IF NOT EXISTS policy_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_url TEXT NOT NULL,
    content TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    language TEXT,
    summary TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    ai_score REAL NOT NULL DEFAULT 0,
    upvotes INTEGER NOT NULL DEFAULT 0,
    downvotes INTEGER NOT NULL DEFAULT 0,
    needs_scoring INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    content_updated_at TEXT NOT NULL,
    UNIQUE(repository_id, file_path)
);

CREATE INDEX IF NOT EXISTS idx_policy_documents_repository ON policy_documents(repository_id);
CREATE INDEX IF NOT EXISTS idx_policy_documents_needs_scoring ON policy_documents(needs_scoring);

-- Crawl runs and their final counters
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    error_message TEXT,
    searched INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    created INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    filtered INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    repos_checked INTEGER NOT NULL DEFAULT 0,
    rate_limited INTEGER NOT NULL DEFAULT 0,
    budget_exhausted INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
