//! Discovery pass
//!
//! Walks the code-search results for every configured filename pattern and
//! turns qualifying hits into catalog rows. A hit qualifies when its
//! repository still exists and has at least the configured number of stars;
//! only then is the file content fetched.

use crate::crawler::{
    absorb, document_attrs, fetch_document, store_document, CrawlDeps, CrawlStats, Fetched, Flow,
    PassEnd, RunBudget,
};
use crate::search::{CandidateHit, HitStream, RepoMetadata, SearchError};
use crate::storage::{lock_catalog, RepositoryAttrs, RepositoryRecord, StorageResult};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

pub struct DiscoveryPass<'a> {
    deps: &'a CrawlDeps,
}

impl<'a> DiscoveryPass<'a> {
    pub(crate) fn new(deps: &'a CrawlDeps) -> Self {
        Self { deps }
    }

    /// Runs the pass until every pattern is exhausted or the run must stop
    ///
    /// Returns `Err` only for authentication failures.
    pub async fn run(
        &self,
        budget: &mut RunBudget,
        stats: &mut CrawlStats,
    ) -> Result<PassEnd, SearchError> {
        // (repository, path) pairs already handled this pass
        let mut seen: HashSet<(String, String)> = HashSet::new();
        // Repository lookups, `None` when the repository is gone
        let mut repos: HashMap<String, Option<RepoMetadata>> = HashMap::new();

        for pattern in &self.deps.settings.patterns {
            tracing::info!("Discovering filename:{}", pattern.query_term());
            let mut stream = HitStream::new(self.deps.search.as_ref(), pattern);

            loop {
                if budget.is_exhausted() {
                    stats.budget_exhausted = true;
                    return Ok(PassEnd::BudgetExhausted);
                }

                let hit = match stream.next().await {
                    Ok(Some(hit)) => hit,
                    Ok(None) => break,
                    Err(e) => match absorb(e, stats, &format!("search {}", pattern))? {
                        Flow::Stop(end) => return Ok(end),
                        Flow::Continue => break,
                    },
                };

                stats.searched += 1;
                let key = (hit.full_name.to_ascii_lowercase(), hit.path.clone());
                if !seen.insert(key) {
                    tracing::trace!("Already handled {}:{}", hit.full_name, hit.path);
                    continue;
                }

                if let Flow::Stop(end) = self.process_hit(&hit, &mut repos, budget, stats).await? {
                    return Ok(end);
                }
            }

            tracing::debug!(
                "Pattern {} done after {} pages",
                pattern,
                stream.pages_fetched()
            );
        }

        Ok(PassEnd::Completed)
    }

    async fn process_hit(
        &self,
        hit: &CandidateHit,
        repos: &mut HashMap<String, Option<RepoMetadata>>,
        budget: &mut RunBudget,
        stats: &mut CrawlStats,
    ) -> Result<Flow, SearchError> {
        let cache_key = hit.full_name.to_ascii_lowercase();
        let metadata = match repos.get(&cache_key) {
            Some(cached) => cached.clone(),
            None => match self.deps.search.repository(&hit.full_name).await {
                Ok(meta) => {
                    repos.insert(cache_key, Some(meta.clone()));
                    Some(meta)
                }
                Err(SearchError::NotFound { .. }) => {
                    repos.insert(cache_key, None);
                    None
                }
                Err(e) => return absorb(e, stats, &format!("repository {}", hit.full_name)),
            },
        };

        let Some(metadata) = metadata else {
            tracing::debug!("Repository {} is gone, skipping hit", hit.full_name);
            stats.skipped += 1;
            return Ok(Flow::Continue);
        };

        if metadata.stars < self.deps.settings.star_threshold {
            tracing::debug!(
                "Filtered {} ({} stars < {})",
                metadata.full_name,
                metadata.stars,
                self.deps.settings.star_threshold
            );
            stats.filtered += 1;
            return Ok(Flow::Continue);
        }

        let content =
            match fetch_document(self.deps, budget, stats, &hit.full_name, &hit.path).await? {
                Fetched::Text(content) => content,
                Fetched::Handled(flow) => return Ok(flow),
            };

        let repository = match self.save_repository(&metadata) {
            Ok(repository) => repository,
            Err(e) => {
                tracing::warn!("Failed to store repository {}: {}", metadata.full_name, e);
                stats.errors += 1;
                return Ok(Flow::Continue);
            }
        };

        let attrs = document_attrs(
            &hit.path,
            &hit.filename,
            metadata.file_url(&hit.path),
            content,
        );
        store_document(self.deps, stats, &repository, attrs);

        Ok(Flow::Continue)
    }

    /// Upserts the repository, stamping it as crawled when newly created
    fn save_repository(&self, metadata: &RepoMetadata) -> StorageResult<RepositoryRecord> {
        let mut store = lock_catalog(&self.deps.catalog)?;
        let upserted = store.upsert_repository(&RepositoryAttrs::from(metadata))?;
        if upserted.created {
            tracing::info!(
                "New repository {} ({} stars)",
                metadata.full_name,
                metadata.stars
            );
            store.touch_last_crawled(upserted.repository.id, Utc::now())?;
        }
        Ok(upserted.repository)
    }
}
