//! Storage traits and error types
//!
//! This module defines the trait interface for catalog backends and
//! associated error types.

use crate::crawler::{CrawlMode, CrawlStats};
use crate::storage::{
    DocumentAttrs, DocumentRecord, RecheckKey, RepositoryAttrs, RepositoryRecord, RunRecord,
    RunStatus, ScoreUpdate, UpsertedDocument, UpsertedRepository,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for catalog backend implementations
///
/// Every upsert is atomic: a reader never observes a repository row without
/// its attributes or a document whose fingerprint disagrees with its content.
pub trait CatalogStore {
    // ===== Repositories =====

    fn find_repository(&self, full_name: &str) -> StorageResult<Option<RepositoryRecord>>;

    /// Inserts a repository or refreshes its metadata
    ///
    /// Never creates a duplicate row for the same `full_name`, even when a
    /// concurrent writer inserts it first.
    fn upsert_repository(&mut self, attrs: &RepositoryAttrs) -> StorageResult<UpsertedRepository>;

    /// Stamps the time the repository was last visited by a crawl pass
    fn touch_last_crawled(&mut self, repository_id: i64, at: DateTime<Utc>) -> StorageResult<()>;

    /// Returns repositories last crawled before `stale_before` (or never)
    ///
    /// Ordered never-crawled first, then by `last_crawled_at` ascending with
    /// the id as tie-breaker. `after` continues from a previous batch.
    fn repos_needing_recheck(
        &self,
        stale_before: DateTime<Utc>,
        after: Option<&RecheckKey>,
        limit: usize,
    ) -> StorageResult<Vec<RepositoryRecord>>;

    // ===== Documents =====

    fn find_document(
        &self,
        repository_id: i64,
        file_path: &str,
    ) -> StorageResult<Option<DocumentRecord>>;

    /// Inserts a document or replaces its content when the fingerprint changed
    ///
    /// An unchanged fingerprint leaves the row untouched, including
    /// `content_updated_at`.
    fn upsert_document(
        &mut self,
        repository_id: i64,
        attrs: &DocumentAttrs,
    ) -> StorageResult<UpsertedDocument>;

    fn documents_for_repository(&self, repository_id: i64) -> StorageResult<Vec<DocumentRecord>>;

    /// Documents flagged for (re)scoring, oldest change first
    fn pending_scoring(&self, limit: usize) -> StorageResult<Vec<DocumentRecord>>;

    /// Writes scoring results back onto a document
    ///
    /// The scoring flag is only cleared when the scored fingerprint still
    /// matches the stored content.
    fn record_score(&mut self, document_id: i64, score: &ScoreUpdate) -> StorageResult<()>;

    // ===== Run Management =====

    /// Records a queued run
    fn create_run(&mut self, mode: CrawlMode, config_hash: &str) -> StorageResult<i64>;

    fn mark_run_running(&mut self, run_id: i64) -> StorageResult<()>;

    /// Records the final status and counters of a run
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        stats: &CrawlStats,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Statistics =====

    fn count_repositories(&self) -> StorageResult<u64>;

    fn count_documents(&self) -> StorageResult<u64>;

    fn count_pending_scoring(&self) -> StorageResult<u64>;

    fn count_never_crawled(&self) -> StorageResult<u64>;

    /// Document counts per filename, most common first
    fn documents_by_filename(&self) -> StorageResult<Vec<(String, u64)>>;
}
