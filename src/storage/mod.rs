//! Storage module for the policy catalog
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Repository and policy document upserts with change detection
//! - Recheck selection for the update pass
//! - Run tracking for queued and scheduled crawls

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCatalog;
pub use traits::{CatalogStore, StorageError, StorageResult};

use crate::crawler::{CrawlMode, CrawlStats};
use crate::search::RepoMetadata;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Catalog handle shared between the orchestrator and background tasks
pub type SharedCatalog = Arc<Mutex<dyn CatalogStore + Send>>;

/// Opens (or creates) the catalog database at `path`
pub fn open_catalog(path: &Path) -> crate::Result<SqliteCatalog> {
    SqliteCatalog::new(path)
}

/// Wraps a store for sharing across tasks
pub fn share<S: CatalogStore + Send + 'static>(store: S) -> SharedCatalog {
    Arc::new(Mutex::new(store))
}

/// Locks the shared catalog
///
/// Callers must drop the guard before awaiting.
pub fn lock_catalog(
    catalog: &SharedCatalog,
) -> StorageResult<MutexGuard<'_, dyn CatalogStore + Send + 'static>> {
    catalog
        .lock()
        .map_err(|_| StorageError::Database("catalog lock poisoned".to_string()))
}

/// Formats a timestamp the way every column stores it
pub fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp
pub fn parse_db_time(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|t| t.with_timezone(&Utc))
}

/// Represents a repository in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRecord {
    pub id: i64,
    pub full_name: String,
    pub name: String,
    pub stars: u32,
    pub forks: u32,
    pub language: Option<String>,
    pub url: String,
    pub pushed_at: Option<DateTime<Utc>>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Repository fields written on every upsert
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryAttrs {
    pub full_name: String,
    pub name: String,
    pub stars: u32,
    pub forks: u32,
    pub language: Option<String>,
    pub url: String,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl From<&RepoMetadata> for RepositoryAttrs {
    fn from(meta: &RepoMetadata) -> Self {
        Self {
            full_name: meta.full_name.clone(),
            name: meta.name.clone(),
            stars: meta.stars,
            forks: meta.forks,
            language: meta.language.clone(),
            url: meta.url.clone(),
            pushed_at: meta.pushed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertedRepository {
    pub repository: RepositoryRecord,
    pub created: bool,
}

/// Represents a policy document in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: i64,
    pub repository_id: i64,
    pub filename: String,
    pub file_path: String,
    pub file_url: String,
    pub content: String,
    pub fingerprint: String,
    pub language: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub ai_score: f64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub needs_scoring: bool,
    pub created_at: DateTime<Utc>,
    pub content_updated_at: DateTime<Utc>,
}

/// Document fields supplied by a crawl pass
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAttrs {
    pub file_path: String,
    pub filename: String,
    pub file_url: String,
    pub content: String,
    pub language: Option<String>,
}

/// What an upsert did to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Created,
    Updated,
    /// Fingerprint matched; nothing was written
    Unchanged,
}

impl DocumentOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct UpsertedDocument {
    pub document: DocumentRecord,
    pub outcome: DocumentOutcome,
}

/// Scoring results written back by the scoring pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    /// Fingerprint of the content that was scored
    pub fingerprint: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub ai_score: f64,
}

/// Keyset position in the recheck ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecheckKey {
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub id: i64,
}

impl From<&RepositoryRecord> for RecheckKey {
    fn from(repo: &RepositoryRecord) -> Self {
        Self {
            last_crawled_at: repo.last_crawled_at,
            id: repo.id,
        }
    }
}

/// Lazy walk over repositories due for a recheck
///
/// Repositories are yielded never-crawled first, then least recently
/// crawled, fetched from the store one batch at a time.
#[derive(Debug)]
pub struct RecheckCursor {
    stale_before: DateTime<Utc>,
    batch_size: usize,
    after: Option<RecheckKey>,
    buffer: VecDeque<RepositoryRecord>,
    exhausted: bool,
}

impl RecheckCursor {
    pub fn new(stale_before: DateTime<Utc>, batch_size: usize) -> Self {
        Self {
            stale_before,
            batch_size: batch_size.max(1),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn next<S: CatalogStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> StorageResult<Option<RepositoryRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch =
                store.repos_needing_recheck(self.stale_before, self.after.as_ref(), self.batch_size)?;
            self.exhausted = batch.len() < self.batch_size;
            self.buffer.extend(batch);
        }

        let next = self.buffer.pop_front();
        if let Some(repo) = &next {
            self.after = Some(RecheckKey::from(repo));
        }
        Ok(next)
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub mode: CrawlMode,
    pub status: RunStatus,
    pub config_hash: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub stats: CrawlStats,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
