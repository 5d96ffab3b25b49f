//! Crawler module for discovering and refreshing policy documents
//!
//! This module contains the core crawling logic, including:
//! - The discovery pass (search hits to catalog rows)
//! - The update pass (rechecking known repositories)
//! - The per-run hit and time budget
//! - Overall run orchestration

mod budget;
mod coordinator;
mod discovery;
mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::RunBudget;
pub use coordinator::{CrawlSettings, Orchestrator};
pub use discovery::DiscoveryPass;
pub use update::UpdatePass;

use crate::config::Config;
use crate::content::detect_language;
use crate::scoring::{ScoringRequest, ScoringSink};
use crate::search::{CodeSearch, SearchError};
use crate::storage::{
    lock_catalog, DocumentAttrs, DocumentOutcome, RepositoryRecord, SharedCatalog,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Which passes a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    Discover,
    Update,
    /// Update first, then discover
    Both,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Update => "update",
            Self::Both => "both",
        }
    }

    pub fn includes_discovery(&self) -> bool {
        matches!(self, Self::Discover | Self::Both)
    }

    pub fn includes_update(&self) -> bool {
        matches!(self, Self::Update | Self::Both)
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discover" | "discovery" => Ok(Self::Discover),
            "update" => Ok(Self::Update),
            "both" | "all" => Ok(Self::Both),
            other => Err(format!(
                "unknown crawl mode '{}' (expected discover, update, or both)",
                other
            )),
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters describing what a run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// Search hits yielded to the discovery pass
    pub searched: u64,
    /// Documents fetched and written (or confirmed unchanged)
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    /// Unchanged documents and items that vanished upstream
    pub skipped: u64,
    /// Hits dropped by the star threshold
    pub filtered: u64,
    pub errors: u64,
    /// Repositories visited by the update pass
    pub repos_checked: u64,
    pub rate_limited: bool,
    pub budget_exhausted: bool,
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "searched={} processed={} created={} updated={} skipped={} filtered={} errors={} repos_checked={}",
            self.searched,
            self.processed,
            self.created,
            self.updated,
            self.skipped,
            self.filtered,
            self.errors,
            self.repos_checked
        )?;
        if self.rate_limited {
            f.write_str(" (rate limited)")?;
        }
        if self.budget_exhausted {
            f.write_str(" (budget exhausted)")?;
        }
        Ok(())
    }
}

/// A run that ended on a fatal error, with the counters gathered so far
#[derive(Debug, Error)]
#[error("Crawl aborted: {source}")]
pub struct CrawlAborted {
    pub stats: CrawlStats,
    pub source: SearchError,
}

/// Why a pass stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEnd {
    Completed,
    RateLimited,
    BudgetExhausted,
}

/// Whether a pass keeps going after handling one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop(PassEnd),
}

/// Everything a pass needs, owned by the orchestrator
pub(crate) struct CrawlDeps {
    pub search: Arc<dyn CodeSearch>,
    pub catalog: SharedCatalog,
    pub scoring: Arc<dyn ScoringSink>,
    pub settings: CrawlSettings,
}

/// Folds a per-item API error into the run counters
///
/// Only authentication failures escape; everything else is recorded and the
/// pass decides whether to continue.
pub(crate) fn absorb(
    error: SearchError,
    stats: &mut CrawlStats,
    context: &str,
) -> Result<Flow, SearchError> {
    match error {
        SearchError::Auth { .. } => Err(error),
        SearchError::RateLimited { .. } => {
            tracing::warn!("Stopping pass at {}: {}", context, error);
            stats.rate_limited = true;
            Ok(Flow::Stop(PassEnd::RateLimited))
        }
        SearchError::NotFound { .. } => {
            tracing::debug!("{} no longer exists upstream", context);
            stats.skipped += 1;
            Ok(Flow::Continue)
        }
        other => {
            tracing::warn!("Error processing {}: {}", context, other);
            stats.errors += 1;
            Ok(Flow::Continue)
        }
    }
}

pub(crate) enum Fetched {
    Text(String),
    Handled(Flow),
}

/// Claims one unit of run budget and fetches a document
pub(crate) async fn fetch_document(
    deps: &CrawlDeps,
    budget: &mut RunBudget,
    stats: &mut CrawlStats,
    full_name: &str,
    path: &str,
) -> Result<Fetched, SearchError> {
    if !budget.try_claim() {
        tracing::info!("Run budget spent after {} fetches", budget.claimed());
        stats.budget_exhausted = true;
        return Ok(Fetched::Handled(Flow::Stop(PassEnd::BudgetExhausted)));
    }

    match deps.search.fetch_content(full_name, path).await {
        Ok(text) => Ok(Fetched::Text(text)),
        Err(e) => absorb(e, stats, &format!("{}:{}", full_name, path)).map(Fetched::Handled),
    }
}

pub(crate) fn document_attrs(
    path: &str,
    filename: &str,
    file_url: String,
    content: String,
) -> DocumentAttrs {
    let language = Some(detect_language(&content).to_string());
    DocumentAttrs {
        file_path: path.to_string(),
        filename: filename.to_string(),
        file_url,
        content,
        language,
    }
}

/// Upserts a fetched document and notifies the scoring sink on change
pub(crate) fn store_document(
    deps: &CrawlDeps,
    stats: &mut CrawlStats,
    repository: &RepositoryRecord,
    attrs: DocumentAttrs,
) {
    let result =
        lock_catalog(&deps.catalog).and_then(|mut store| store.upsert_document(repository.id, &attrs));

    let upserted = match result {
        Ok(upserted) => upserted,
        Err(e) => {
            tracing::warn!(
                "Failed to store {}:{}: {}",
                repository.full_name,
                attrs.file_path,
                e
            );
            stats.errors += 1;
            return;
        }
    };

    stats.processed += 1;
    match upserted.outcome {
        DocumentOutcome::Created => {
            stats.created += 1;
            tracing::info!("New document {}:{}", repository.full_name, attrs.file_path);
        }
        DocumentOutcome::Updated => {
            stats.updated += 1;
            tracing::info!("Updated document {}:{}", repository.full_name, attrs.file_path);
        }
        DocumentOutcome::Unchanged => {
            stats.skipped += 1;
            tracing::debug!("Unchanged {}:{}", repository.full_name, attrs.file_path);
        }
    }

    if upserted.outcome.changed() {
        deps.scoring
            .document_changed(ScoringRequest::from_document(&upserted.document));
    }
}

/// Runs one crawl against the configured API and catalog
pub async fn crawl(config: &Config, mode: CrawlMode) -> crate::Result<CrawlStats> {
    let orchestrator = Orchestrator::from_config(config)?;
    Ok(orchestrator.run(mode).await?)
}
