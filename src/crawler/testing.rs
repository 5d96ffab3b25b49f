//! In-memory search backend for crawl pass tests

use crate::crawler::{CrawlSettings, Orchestrator};
use crate::search::{
    CandidateHit, CodeSearch, FilenamePattern, RateResource, RepoMetadata, SearchError,
    SearchPage, SearchResult,
};
use crate::storage::{self, SharedCatalog, SqliteCatalog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable [`CodeSearch`] with call counters and failure injection
#[derive(Default)]
pub(crate) struct FakeSearch {
    hits: Mutex<HashMap<String, Vec<CandidateHit>>>,
    repos: Mutex<HashMap<String, RepoMetadata>>,
    files: Mutex<HashMap<(String, String), String>>,
    fetch_failures: Mutex<HashMap<(String, String), SearchError>>,
    fetch_calls: AtomicU32,
    repo_calls: AtomicU32,
    rate_limit_fetch_at: AtomicU32,
    auth_failure: AtomicBool,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, full_name: &str, stars: u32) {
        let name = full_name.split('/').nth(1).unwrap_or(full_name).to_string();
        self.repos.lock().unwrap().insert(
            full_name.to_string(),
            RepoMetadata {
                full_name: full_name.to_string(),
                name,
                stars,
                forks: 0,
                language: Some("Rust".to_string()),
                url: format!("https://github.com/{}", full_name),
                pushed_at: Some(Utc::now() - chrono::Duration::days(30)),
                default_branch: "main".to_string(),
            },
        );
    }

    pub fn remove_repo(&self, full_name: &str) {
        self.repos.lock().unwrap().remove(full_name);
    }

    pub fn set_pushed_at(&self, full_name: &str, pushed_at: DateTime<Utc>) {
        if let Some(repo) = self.repos.lock().unwrap().get_mut(full_name) {
            repo.pushed_at = Some(pushed_at);
        }
    }

    /// Registers a search hit under a pattern as written in configuration
    pub fn add_hit(&self, pattern: &str, full_name: &str, path: &str) {
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        self.hits
            .lock()
            .unwrap()
            .entry(pattern.to_string())
            .or_default()
            .push(CandidateHit {
                full_name: full_name.to_string(),
                path: path.to_string(),
                filename,
            });
    }

    pub fn set_file(&self, full_name: &str, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert((full_name.to_string(), path.to_string()), content.to_string());
    }

    pub fn remove_file(&self, full_name: &str, path: &str) {
        self.files
            .lock()
            .unwrap()
            .remove(&(full_name.to_string(), path.to_string()));
    }

    /// Makes the n-th content fetch (1-based) fail with a rate limit
    pub fn rate_limit_fetch_at(&self, call: u32) {
        self.rate_limit_fetch_at.store(call, Ordering::SeqCst);
    }

    /// Makes every fetch of one file fail with `error`
    pub fn fail_fetch(&self, full_name: &str, path: &str, error: SearchError) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert((full_name.to_string(), path.to_string()), error);
    }

    /// Makes every call fail authentication
    pub fn fail_auth(&self) {
        self.auth_failure.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn repo_calls(&self) -> u32 {
        self.repo_calls.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> SearchResult<()> {
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(SearchError::Auth {
                status: 401,
                message: "Bad credentials".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CodeSearch for FakeSearch {
    async fn search_page(&self, pattern: &FilenamePattern, page: u32) -> SearchResult<SearchPage> {
        self.check_auth()?;
        let hits = if page == 1 {
            self.hits
                .lock()
                .unwrap()
                .get(&pattern.to_string())
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(SearchPage {
            total_count: hits.len() as u64,
            hits,
            has_more: false,
        })
    }

    async fn repository(&self, full_name: &str) -> SearchResult<RepoMetadata> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        self.repos
            .lock()
            .unwrap()
            .get(full_name)
            .cloned()
            .ok_or_else(|| SearchError::NotFound {
                what: full_name.to_string(),
            })
    }

    async fn fetch_content(&self, full_name: &str, path: &str) -> SearchResult<String> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_auth()?;
        if call == self.rate_limit_fetch_at.load(Ordering::SeqCst) {
            return Err(SearchError::RateLimited {
                resource: RateResource::Core,
                reset_at: Some(Utc::now() + chrono::Duration::hours(1)),
            });
        }
        let key = (full_name.to_string(), path.to_string());
        if let Some(error) = self.fetch_failures.lock().unwrap().get(&key) {
            return Err(error.clone());
        }
        self.files
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| SearchError::NotFound {
                what: format!("{}:{}", full_name, path),
            })
    }
}

/// Default crawl settings over the given patterns
pub(crate) fn settings(patterns: &[&str]) -> CrawlSettings {
    CrawlSettings {
        star_threshold: 50,
        max_hits_per_run: 100,
        max_run_duration: Some(Duration::from_secs(60)),
        update_interval: chrono::Duration::hours(24),
        skip_unpushed: true,
        patterns: patterns
            .iter()
            .map(|p| FilenamePattern::parse(p).unwrap())
            .collect(),
    }
}

/// An orchestrator over `fake` and a fresh in-memory catalog
pub(crate) fn orchestrator(
    fake: Arc<FakeSearch>,
    settings: CrawlSettings,
) -> (Orchestrator, SharedCatalog) {
    let catalog = storage::share(SqliteCatalog::new_in_memory().unwrap());
    let orchestrator = Orchestrator::new(fake, catalog.clone(), settings);
    (orchestrator, catalog)
}
