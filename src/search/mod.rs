//! Code-search client layer
//!
//! This module contains everything that talks to the repository-hosting API:
//! - The [`CodeSearch`] trait, the seam the crawl passes are written against
//! - [`GitHubClient`], the REST implementation with retry and rate limiting
//! - [`RateBudget`], the shared per-resource quota tracker
//! - [`HitStream`], the lazy paginated sequence of search hits

mod github;
mod rate_limit;

pub use github::{build_http_client, GitHubClient, GitHubSettings};
pub use rate_limit::{QuotaState, RateBudget, RateResource, Reservation};

use crate::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Errors produced by the search API layer
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// The credential was rejected; never retried
    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Rate limit exhausted for {resource} API (resets at {reset_at:?})")]
    RateLimited {
        resource: RateResource,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("Content of {path} is not valid text")]
    ContentDecode { path: String },

    #[error("API error (HTTP {status}) for {context}: {message}")]
    Api {
        status: u16,
        context: String,
        message: String,
    },

    #[error("Malformed response for {context}: {message}")]
    Malformed { context: String, message: String },
}

impl SearchError {
    /// Returns true for errors that must abort the whole crawl run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// A filename the crawler searches for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilenamePattern {
    /// Exact filename, compared case-insensitively (`CLAUDE.md`)
    Exact(String),
    /// Filename suffix including the dot (`.cursorrules` from `*.cursorrules`)
    Suffix(String),
}

impl FilenamePattern {
    /// Parses a configured pattern: `*.ext` is a suffix, anything else exact
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = pattern.trim();

        if pattern.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "pattern cannot be empty".to_string(),
            ));
        }

        if pattern.contains('/') || pattern.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidPattern(format!(
                "'{}' must be a bare filename",
                pattern
            )));
        }

        if let Some(suffix) = pattern.strip_prefix('*') {
            if !suffix.starts_with('.') || suffix.len() < 2 || suffix.contains('*') {
                return Err(ConfigError::InvalidPattern(format!(
                    "'{}' must look like '*.ext'",
                    pattern
                )));
            }
            return Ok(Self::Suffix(suffix.to_string()));
        }

        if pattern.contains('*') {
            return Err(ConfigError::InvalidPattern(format!(
                "'{}' may only use a leading '*'",
                pattern
            )));
        }

        Ok(Self::Exact(pattern.to_string()))
    }

    /// The term placed after `filename:` in the search query
    pub fn query_term(&self) -> &str {
        match self {
            Self::Exact(name) => name,
            Self::Suffix(suffix) => suffix,
        }
    }

    /// Checks a hit's filename against the pattern
    ///
    /// Code search matches `filename:` loosely, so hits are re-checked here.
    pub fn matches(&self, filename: &str) -> bool {
        match self {
            Self::Exact(name) => filename.eq_ignore_ascii_case(name),
            Self::Suffix(suffix) => filename
                .to_ascii_lowercase()
                .ends_with(&suffix.to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => write!(f, "{}", name),
            Self::Suffix(suffix) => write!(f, "*{}", suffix),
        }
    }
}

/// One code-search result: a file inside a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHit {
    /// Repository full name (`owner/name`)
    pub full_name: String,
    /// Path of the file within the repository
    pub path: String,
    /// Filename component of `path`
    pub filename: String,
}

/// Repository metadata as reported by the API
#[derive(Debug, Clone, PartialEq)]
pub struct RepoMetadata {
    pub full_name: String,
    pub name: String,
    pub stars: u32,
    pub forks: u32,
    pub language: Option<String>,
    pub url: String,
    pub pushed_at: Option<DateTime<Utc>>,
    pub default_branch: String,
}

impl RepoMetadata {
    /// Browser URL of a file on the default branch
    pub fn file_url(&self, path: &str) -> String {
        format!(
            "{}/blob/{}/{}",
            self.url.trim_end_matches('/'),
            self.default_branch,
            path
        )
    }
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<CandidateHit>,
    /// Total matches reported by the API (may exceed what is retrievable)
    pub total_count: u64,
    /// Whether another page can be requested
    pub has_more: bool,
}

/// Backend for searching and fetching policy files
///
/// Implementations must be safe to share between tasks; any rate-limit
/// accounting lives inside the implementation.
#[async_trait]
pub trait CodeSearch: Send + Sync {
    /// Fetches one page (1-based) of hits for a filename pattern
    async fn search_page(&self, pattern: &FilenamePattern, page: u32) -> SearchResult<SearchPage>;

    /// Looks up a repository's current metadata
    async fn repository(&self, full_name: &str) -> SearchResult<RepoMetadata>;

    /// Fetches the decoded text of a file
    async fn fetch_content(&self, full_name: &str, path: &str) -> SearchResult<String>;
}

/// Lazy, finite sequence of hits for one pattern
///
/// Pages are requested only when the buffered hits run out, so a consumer that
/// stops early never pays for the remaining pages. Creating a new stream
/// restarts from page one.
pub struct HitStream<'a> {
    search: &'a dyn CodeSearch,
    pattern: &'a FilenamePattern,
    next_page: u32,
    buffer: VecDeque<CandidateHit>,
    exhausted: bool,
}

impl<'a> HitStream<'a> {
    pub fn new(search: &'a dyn CodeSearch, pattern: &'a FilenamePattern) -> Self {
        Self {
            search,
            pattern,
            next_page: 1,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Number of pages requested so far
    pub fn pages_fetched(&self) -> u32 {
        self.next_page - 1
    }

    /// Yields the next hit matching the pattern, or `None` when exhausted
    pub async fn next(&mut self) -> SearchResult<Option<CandidateHit>> {
        loop {
            while let Some(hit) = self.buffer.pop_front() {
                if self.pattern.matches(&hit.filename) {
                    return Ok(Some(hit));
                }
                tracing::trace!(
                    "Dropping loose match {}:{} for pattern {}",
                    hit.full_name,
                    hit.path,
                    self.pattern
                );
            }

            if self.exhausted {
                return Ok(None);
            }

            let page = self.search.search_page(self.pattern, self.next_page).await?;
            tracing::debug!(
                "Search {} page {}: {} hits (total {})",
                self.pattern,
                self.next_page,
                page.hits.len(),
                page.total_count
            );
            self.next_page += 1;
            self.exhausted = !page.has_more || page.hits.is_empty();
            self.buffer.extend(page.hits);
        }
    }
}
