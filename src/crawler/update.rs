//! Update pass
//!
//! Revisits repositories whose last crawl is older than the update interval,
//! refreshing their metadata and re-fetching every known document. A
//! repository is stamped as crawled once it has been fully handled, so an
//! interrupted pass resumes where it stopped.

use crate::crawler::{
    absorb, document_attrs, fetch_document, store_document, CrawlDeps, CrawlStats, Fetched, Flow,
    PassEnd, RunBudget,
};
use crate::search::{RepoMetadata, SearchError};
use crate::storage::{
    lock_catalog, DocumentRecord, RecheckCursor, RepositoryAttrs, RepositoryRecord, StorageResult,
};
use chrono::{DateTime, Utc};

/// Repositories loaded from the catalog per query
const RECHECK_BATCH: usize = 50;

pub struct UpdatePass<'a> {
    deps: &'a CrawlDeps,
}

impl<'a> UpdatePass<'a> {
    pub(crate) fn new(deps: &'a CrawlDeps) -> Self {
        Self { deps }
    }

    /// Rechecks stale repositories, oldest first
    pub async fn run(
        &self,
        budget: &mut RunBudget,
        stats: &mut CrawlStats,
    ) -> Result<PassEnd, SearchError> {
        // An interval reaching before the earliest timestamp leaves only
        // never-crawled repositories due
        let stale_before = Utc::now()
            .checked_sub_signed(self.deps.settings.update_interval)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut cursor = RecheckCursor::new(stale_before, RECHECK_BATCH);
        tracing::info!("Rechecking repositories last crawled before {}", stale_before);

        loop {
            if budget.is_exhausted() {
                stats.budget_exhausted = true;
                return Ok(PassEnd::BudgetExhausted);
            }

            let next = lock_catalog(&self.deps.catalog).and_then(|store| cursor.next(&*store));
            let repository = match next {
                Ok(Some(repository)) => repository,
                Ok(None) => break,
                Err(e) => {
                    // Nothing further can be read, so the pass ends here
                    tracing::error!("Failed to load repositories for recheck: {}", e);
                    stats.errors += 1;
                    break;
                }
            };

            stats.repos_checked += 1;
            if let Flow::Stop(end) = self.recheck(&repository, budget, stats).await? {
                return Ok(end);
            }
        }

        Ok(PassEnd::Completed)
    }

    async fn recheck(
        &self,
        repository: &RepositoryRecord,
        budget: &mut RunBudget,
        stats: &mut CrawlStats,
    ) -> Result<Flow, SearchError> {
        tracing::debug!("Rechecking {}", repository.full_name);

        let metadata = match self.deps.search.repository(&repository.full_name).await {
            Ok(metadata) => metadata,
            Err(e) => {
                let flow = absorb(e, stats, &format!("repository {}", repository.full_name))?;
                if flow == Flow::Continue {
                    self.touch(repository, stats);
                }
                return Ok(flow);
            }
        };

        let (updated, documents) = match self.refresh(repository, &metadata) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("Failed to refresh {}: {}", repository.full_name, e);
                stats.errors += 1;
                self.touch(repository, stats);
                return Ok(Flow::Continue);
            }
        };

        let unpushed = match (metadata.pushed_at, repository.last_crawled_at) {
            (Some(pushed_at), Some(crawled_at)) => pushed_at <= crawled_at,
            _ => false,
        };
        if self.deps.settings.skip_unpushed && unpushed {
            tracing::debug!(
                "{} has not been pushed since its last crawl, skipping {} documents",
                repository.full_name,
                documents.len()
            );
            stats.skipped += 1;
            self.touch(&updated, stats);
            return Ok(Flow::Continue);
        }

        for document in &documents {
            let content = match fetch_document(
                self.deps,
                budget,
                stats,
                &repository.full_name,
                &document.file_path,
            )
            .await?
            {
                Fetched::Text(content) => content,
                Fetched::Handled(Flow::Continue) => continue,
                Fetched::Handled(stop) => return Ok(stop),
            };

            let attrs = document_attrs(
                &document.file_path,
                &document.filename,
                metadata.file_url(&document.file_path),
                content,
            );
            store_document(self.deps, stats, &updated, attrs);
        }

        self.touch(&updated, stats);
        Ok(Flow::Continue)
    }

    /// Stores fresh metadata and lists the repository's documents
    fn refresh(
        &self,
        repository: &RepositoryRecord,
        metadata: &RepoMetadata,
    ) -> StorageResult<(RepositoryRecord, Vec<DocumentRecord>)> {
        // Renames upstream keep the catalog's name
        let attrs = RepositoryAttrs {
            full_name: repository.full_name.clone(),
            ..RepositoryAttrs::from(metadata)
        };

        let mut store = lock_catalog(&self.deps.catalog)?;
        let upserted = store.upsert_repository(&attrs)?;
        let documents = store.documents_for_repository(upserted.repository.id)?;
        Ok((upserted.repository, documents))
    }

    fn touch(&self, repository: &RepositoryRecord, stats: &mut CrawlStats) {
        let result = lock_catalog(&self.deps.catalog)
            .and_then(|mut store| store.touch_last_crawled(repository.id, Utc::now()));
        if let Err(e) = result {
            tracing::warn!("Failed to stamp {} as crawled: {}", repository.full_name, e);
            stats.errors += 1;
        }
    }
}
