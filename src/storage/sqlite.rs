//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the CatalogStore trait.

use crate::crawler::{CrawlMode, CrawlStats};
use crate::fingerprint::fingerprint;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CatalogStore, StorageError, StorageResult};
use crate::storage::{
    parse_db_time, to_db_time, DocumentAttrs, DocumentOutcome, DocumentRecord, RecheckKey,
    RepositoryAttrs, RepositoryRecord, RunRecord, RunStatus, ScoreUpdate, UpsertedDocument,
    UpsertedRepository,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

const REPOSITORY_COLUMNS: &str =
    "id, full_name, name, stars, forks, language, url, pushed_at, last_crawled_at, created_at";

const DOCUMENT_COLUMNS: &str = "id, repository_id, filename, file_path, file_url, content, \
     fingerprint, language, summary, tags, ai_score, upvotes, downvotes, needs_scoring, \
     created_at, content_updated_at";

const RUN_COLUMNS: &str = "id, mode, status, config_hash, queued_at, started_at, finished_at, \
     error_message, searched, processed, created, updated, skipped, filtered, errors, \
     repos_checked, rate_limited, budget_exhausted";

/// SQLite catalog backend
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Opens or creates the catalog database at `path`
    pub fn new(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl CatalogStore for SqliteCatalog {
    // ===== Repositories =====

    fn find_repository(&self, full_name: &str) -> StorageResult<Option<RepositoryRecord>> {
        Ok(select_repository(&self.conn, full_name)?)
    }

    fn upsert_repository(&mut self, attrs: &RepositoryAttrs) -> StorageResult<UpsertedRepository> {
        let now = to_db_time(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = repository_id(&tx, &attrs.full_name)?;
        let created = write_repository(&tx, attrs, existing, &now)?;

        let repository = select_repository(&tx, &attrs.full_name)?
            .ok_or_else(|| StorageError::RepositoryNotFound(attrs.full_name.clone()))?;
        tx.commit()?;

        Ok(UpsertedRepository {
            repository,
            created,
        })
    }

    fn touch_last_crawled(&mut self, repository_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        let rows = self.conn.execute(
            "UPDATE repositories SET last_crawled_at = ?1 WHERE id = ?2",
            params![to_db_time(at), repository_id],
        )?;
        if rows == 0 {
            return Err(StorageError::RepositoryNotFound(repository_id.to_string()));
        }
        Ok(())
    }

    fn repos_needing_recheck(
        &self,
        stale_before: DateTime<Utc>,
        after: Option<&RecheckKey>,
        limit: usize,
    ) -> StorageResult<Vec<RepositoryRecord>> {
        // Never-crawled rows sort as '' so they come first
        let (after_crawled, after_id) = match after {
            Some(key) => (key.last_crawled_at.map(to_db_time).unwrap_or_default(), key.id),
            None => (String::new(), 0),
        };

        let sql = format!(
            "SELECT {} FROM repositories
             WHERE (last_crawled_at IS NULL OR last_crawled_at < ?1)
               AND (COALESCE(last_crawled_at, '') > ?2
                    OR (COALESCE(last_crawled_at, '') = ?2 AND id > ?3))
             ORDER BY COALESCE(last_crawled_at, ''), id
             LIMIT ?4",
            REPOSITORY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let repos = stmt
            .query_map(
                params![to_db_time(stale_before), after_crawled, after_id, limit as i64],
                repository_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    // ===== Documents =====

    fn find_document(
        &self,
        repository_id: i64,
        file_path: &str,
    ) -> StorageResult<Option<DocumentRecord>> {
        Ok(select_document(&self.conn, repository_id, file_path)?)
    }

    fn upsert_document(
        &mut self,
        repository_id: i64,
        attrs: &DocumentAttrs,
    ) -> StorageResult<UpsertedDocument> {
        let digest = fingerprint(&attrs.content);
        let now = to_db_time(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = document_fingerprint(&tx, repository_id, &attrs.file_path)?;
        let outcome = write_document(&tx, repository_id, attrs, &digest, existing, &now)?;

        let document = select_document(&tx, repository_id, &attrs.file_path)?.ok_or_else(|| {
            StorageError::Database(format!(
                "document {} vanished during upsert",
                attrs.file_path
            ))
        })?;
        tx.commit()?;

        Ok(UpsertedDocument { document, outcome })
    }

    fn documents_for_repository(&self, repository_id: i64) -> StorageResult<Vec<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM policy_documents WHERE repository_id = ?1 ORDER BY file_path",
            DOCUMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let documents = stmt
            .query_map(params![repository_id], document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn pending_scoring(&self, limit: usize) -> StorageResult<Vec<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM policy_documents WHERE needs_scoring = 1
             ORDER BY content_updated_at, id LIMIT ?1",
            DOCUMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let documents = stmt
            .query_map(params![limit as i64], document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn record_score(&mut self, document_id: i64, score: &ScoreUpdate) -> StorageResult<()> {
        let tags = serde_json::to_string(&score.tags)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let rows = self.conn.execute(
            "UPDATE policy_documents
             SET summary = ?1, tags = ?2, ai_score = ?3,
                 needs_scoring = CASE WHEN fingerprint = ?4 THEN 0 ELSE needs_scoring END
             WHERE id = ?5",
            params![score.summary, tags, score.ai_score, score.fingerprint, document_id],
        )?;
        if rows == 0 {
            return Err(StorageError::DocumentNotFound(document_id));
        }
        Ok(())
    }

    // ===== Run Management =====

    fn create_run(&mut self, mode: CrawlMode, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_runs (mode, status, config_hash, queued_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                mode.as_str(),
                RunStatus::Queued.to_db_string(),
                config_hash,
                to_db_time(Utc::now())
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn mark_run_running(&mut self, run_id: i64) -> StorageResult<()> {
        let rows = self.conn.execute(
            "UPDATE crawl_runs SET status = ?1, started_at = ?2 WHERE id = ?3",
            params![
                RunStatus::Running.to_db_string(),
                to_db_time(Utc::now()),
                run_id
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        stats: &CrawlStats,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = to_db_time(Utc::now());
        let rows = self.conn.execute(
            "UPDATE crawl_runs SET
                status = ?1, finished_at = ?2, started_at = COALESCE(started_at, ?2),
                error_message = ?3, searched = ?4, processed = ?5, created = ?6, updated = ?7,
                skipped = ?8, filtered = ?9, errors = ?10, repos_checked = ?11,
                rate_limited = ?12, budget_exhausted = ?13
             WHERE id = ?14",
            params![
                status.to_db_string(),
                now,
                error_message,
                stats.searched as i64,
                stats.processed as i64,
                stats.created as i64,
                stats.updated as i64,
                stats.skipped as i64,
                stats.filtered as i64,
                stats.errors as i64,
                stats.repos_checked as i64,
                stats.rate_limited,
                stats.budget_exhausted,
                run_id
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM crawl_runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM crawl_runs ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [], run_from_row).optional()?)
    }

    // ===== Statistics =====

    fn count_repositories(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM repositories")
    }

    fn count_documents(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM policy_documents")
    }

    fn count_pending_scoring(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM policy_documents WHERE needs_scoring = 1")
    }

    fn count_never_crawled(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM repositories WHERE last_crawled_at IS NULL")
    }

    fn documents_by_filename(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, COUNT(*) AS n FROM policy_documents
             GROUP BY filename ORDER BY n DESC, filename",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, count as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// True for UNIQUE constraint failures, which signal a lost insert race
fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn repository_id(conn: &Connection, full_name: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM repositories WHERE full_name = ?1",
        params![full_name],
        |row| row.get(0),
    )
    .optional()
}

fn select_repository(conn: &Connection, full_name: &str) -> rusqlite::Result<Option<RepositoryRecord>> {
    let sql = format!(
        "SELECT {} FROM repositories WHERE full_name = ?1",
        REPOSITORY_COLUMNS
    );
    conn.query_row(&sql, params![full_name], repository_from_row)
        .optional()
}

/// Inserts or updates a repository row; returns true when a row was created
///
/// `existing` is the id seen before writing. If the insert loses a race
/// against another writer, the winner's row is updated instead.
fn write_repository(
    conn: &Connection,
    attrs: &RepositoryAttrs,
    existing: Option<i64>,
    now: &str,
) -> StorageResult<bool> {
    if let Some(id) = existing {
        update_repository(conn, id, attrs)?;
        return Ok(false);
    }

    let inserted = conn.execute(
        "INSERT INTO repositories (full_name, name, stars, forks, language, url, pushed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            attrs.full_name,
            attrs.name,
            attrs.stars,
            attrs.forks,
            attrs.language,
            attrs.url,
            attrs.pushed_at.map(to_db_time),
            now
        ],
    );

    match inserted {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(
                "Repository {} was inserted concurrently, updating instead",
                attrs.full_name
            );
            let id = repository_id(conn, &attrs.full_name)?.ok_or_else(|| {
                StorageError::ConstraintViolation(format!(
                    "repository {} conflicts but cannot be found",
                    attrs.full_name
                ))
            })?;
            update_repository(conn, id, attrs)?;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn update_repository(conn: &Connection, id: i64, attrs: &RepositoryAttrs) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE repositories
         SET name = ?1, stars = ?2, forks = ?3, language = ?4, url = ?5, pushed_at = ?6
         WHERE id = ?7",
        params![
            attrs.name,
            attrs.stars,
            attrs.forks,
            attrs.language,
            attrs.url,
            attrs.pushed_at.map(to_db_time),
            id
        ],
    )?;
    Ok(())
}

fn document_fingerprint(
    conn: &Connection,
    repository_id: i64,
    file_path: &str,
) -> rusqlite::Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT id, fingerprint FROM policy_documents WHERE repository_id = ?1 AND file_path = ?2",
        params![repository_id, file_path],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn select_document(
    conn: &Connection,
    repository_id: i64,
    file_path: &str,
) -> rusqlite::Result<Option<DocumentRecord>> {
    let sql = format!(
        "SELECT {} FROM policy_documents WHERE repository_id = ?1 AND file_path = ?2",
        DOCUMENT_COLUMNS
    );
    conn.query_row(&sql, params![repository_id, file_path], document_from_row)
        .optional()
}

/// Inserts a document or replaces changed content
///
/// `existing` is the (id, fingerprint) seen before writing.
fn write_document(
    conn: &Connection,
    repository_id: i64,
    attrs: &DocumentAttrs,
    digest: &str,
    existing: Option<(i64, String)>,
    now: &str,
) -> StorageResult<DocumentOutcome> {
    match existing {
        Some((_, stored)) if stored == digest => Ok(DocumentOutcome::Unchanged),
        Some((id, _)) => {
            conn.execute(
                "UPDATE policy_documents
                 SET filename = ?1, file_url = ?2, content = ?3, fingerprint = ?4,
                     language = ?5, content_updated_at = ?6, needs_scoring = 1
                 WHERE id = ?7",
                params![
                    attrs.filename,
                    attrs.file_url,
                    attrs.content,
                    digest,
                    attrs.language,
                    now,
                    id
                ],
            )?;
            Ok(DocumentOutcome::Updated)
        }
        None => {
            let inserted = conn.execute(
                "INSERT INTO policy_documents
                    (repository_id, filename, file_path, file_url, content, fingerprint,
                     language, created_at, content_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    repository_id,
                    attrs.filename,
                    attrs.file_path,
                    attrs.file_url,
                    attrs.content,
                    digest,
                    attrs.language,
                    now
                ],
            );

            match inserted {
                Ok(_) => Ok(DocumentOutcome::Created),
                Err(e) if is_unique_violation(&e) => {
                    let current = document_fingerprint(conn, repository_id, &attrs.file_path)?
                        .ok_or_else(|| {
                            StorageError::ConstraintViolation(format!(
                                "document {} conflicts but cannot be found",
                                attrs.file_path
                            ))
                        })?;
                    write_document(conn, repository_id, attrs, digest, Some(current), now)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn conversion_error(
    idx: usize,
    error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, error.into())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_db_time(&text).map_err(|e| conversion_error(idx, e))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_db_time(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: row.get(0)?,
        full_name: row.get(1)?,
        name: row.get(2)?,
        stars: row.get(3)?,
        forks: row.get(4)?,
        language: row.get(5)?,
        url: row.get(6)?,
        pushed_at: opt_time_at(row, 7)?,
        last_crawled_at: opt_time_at(row, 8)?,
        created_at: time_at(row, 9)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let tags: String = row.get(9)?;
    let tags: Vec<String> = serde_json::from_str(&tags).map_err(|e| conversion_error(9, e))?;

    Ok(DocumentRecord {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        filename: row.get(2)?,
        file_path: row.get(3)?,
        file_url: row.get(4)?,
        content: row.get(5)?,
        fingerprint: row.get(6)?,
        language: row.get(7)?,
        summary: row.get(8)?,
        tags,
        ai_score: row.get(10)?,
        upvotes: row.get(11)?,
        downvotes: row.get(12)?,
        needs_scoring: row.get(13)?,
        created_at: time_at(row, 14)?,
        content_updated_at: time_at(row, 15)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let mode: String = row.get(1)?;
    let mode: CrawlMode = mode.parse().map_err(|e: String| conversion_error(1, e))?;
    let status: String = row.get(2)?;
    let status = RunStatus::from_db_string(&status)
        .ok_or_else(|| conversion_error(2, format!("unknown run status '{}'", status)))?;

    let counter = |idx: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(idx)? as u64) };

    Ok(RunRecord {
        id: row.get(0)?,
        mode,
        status,
        config_hash: row.get(3)?,
        queued_at: time_at(row, 4)?,
        started_at: opt_time_at(row, 5)?,
        finished_at: opt_time_at(row, 6)?,
        error_message: row.get(7)?,
        stats: CrawlStats {
            searched: counter(8)?,
            processed: counter(9)?,
            created: counter(10)?,
            updated: counter(11)?,
            skipped: counter(12)?,
            filtered: counter(13)?,
            errors: counter(14)?,
            repos_checked: counter(15)?,
            rate_limited: row.get(16)?,
            budget_exhausted: row.get(17)?,
        },
    })
}
