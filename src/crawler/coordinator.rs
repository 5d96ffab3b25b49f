//! Crawler coordinator - run orchestration
//!
//! This module owns the collaborators a run needs and sequences the passes:
//! - Building the search client, catalog, and settings from configuration
//! - Running update and/or discovery under one shared budget
//! - Turning fatal errors into [`CrawlAborted`] with partial counters
//! - Recording queued runs' lifecycle in the catalog

use crate::config::{resolve_token, Config, CrawlConfig};
use crate::crawler::{
    CrawlAborted, CrawlDeps, CrawlMode, CrawlStats, DiscoveryPass, RunBudget, UpdatePass,
};
use crate::scoring::{LogScoring, ScoringSink};
use crate::search::{CodeSearch, FilenamePattern, GitHubClient, SearchError};
use crate::storage::{self, lock_catalog, RunStatus, SharedCatalog, StorageResult};
use crate::ConfigError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Crawl behavior resolved from configuration
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub star_threshold: u32,
    pub max_hits_per_run: u32,
    pub max_run_duration: Option<Duration>,
    pub update_interval: chrono::Duration,
    pub skip_unpushed: bool,
    pub patterns: Vec<FilenamePattern>,
}

impl CrawlSettings {
    pub fn from_config(config: &CrawlConfig) -> Result<Self, ConfigError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| FilenamePattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let update_interval = i64::try_from(config.update_interval_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                ConfigError::Validation("update-interval-hours is out of range".to_string())
            })?;

        Ok(Self {
            star_threshold: config.star_threshold,
            max_hits_per_run: config.max_hits_per_run,
            max_run_duration: config.max_run_seconds.map(Duration::from_secs),
            update_interval,
            skip_unpushed: config.skip_unpushed,
            patterns,
        })
    }
}

/// Main crawl orchestrator
pub struct Orchestrator {
    deps: CrawlDeps,
}

impl Orchestrator {
    /// Creates an orchestrator that logs scoring notifications
    pub fn new(search: Arc<dyn CodeSearch>, catalog: SharedCatalog, settings: CrawlSettings) -> Self {
        Self {
            deps: CrawlDeps {
                search,
                catalog,
                scoring: Arc::new(LogScoring),
                settings,
            },
        }
    }

    /// Replaces the sink notified about new and changed documents
    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringSink>) -> Self {
        self.deps.scoring = scoring;
        self
    }

    /// Builds the GitHub client and opens the catalog named in `config`
    ///
    /// Fails before any network or database activity if the API token is
    /// missing.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let token = resolve_token(&config.github)?;
        let settings = CrawlSettings::from_config(&config.crawl)?;
        let client = GitHubClient::from_config(&config.github, &token)?;
        let catalog = storage::open_catalog(Path::new(&config.storage.database_path))?;

        Ok(Self::new(Arc::new(client), storage::share(catalog), settings))
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.deps.catalog
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.deps.settings
    }

    /// Runs the passes selected by `mode`
    ///
    /// Both mode updates known repositories first, then discovers new ones
    /// with whatever budget is left. A rate-limited update pass still lets
    /// discovery try, since search is metered separately. Only an
    /// authentication failure aborts the run.
    pub async fn run(&self, mode: CrawlMode) -> Result<CrawlStats, CrawlAborted> {
        let started = Instant::now();
        let settings = &self.deps.settings;
        let mut stats = CrawlStats::default();
        let mut budget = RunBudget::new(settings.max_hits_per_run, settings.max_run_duration);

        tracing::info!(
            "Starting {} crawl (budget: {} fetches{})",
            mode,
            settings.max_hits_per_run,
            settings
                .max_run_duration
                .map(|d| format!(", {:?}", d))
                .unwrap_or_default()
        );

        if mode.includes_update() {
            let outcome = UpdatePass::new(&self.deps).run(&mut budget, &mut stats).await;
            match outcome {
                Ok(end) => tracing::info!("Update pass ended: {:?}", end),
                Err(source) => return Err(abort(stats, source)),
            }
        }

        if mode.includes_discovery() {
            if budget.is_exhausted() {
                stats.budget_exhausted = true;
                tracing::info!("Run budget spent, skipping discovery");
            } else {
                let outcome = DiscoveryPass::new(&self.deps).run(&mut budget, &mut stats).await;
                match outcome {
                    Ok(end) => tracing::info!("Discovery pass ended: {:?}", end),
                    Err(source) => return Err(abort(stats, source)),
                }
            }
        }

        tracing::info!("Crawl finished in {:?}: {}", started.elapsed(), stats);
        Ok(stats)
    }

    /// Records a queued run and returns its id
    pub fn queue_run(&self, mode: CrawlMode, config_hash: &str) -> StorageResult<i64> {
        let mut store = lock_catalog(&self.deps.catalog)?;
        store.create_run(mode, config_hash)
    }

    /// Runs a previously queued run, recording its progress and outcome
    pub async fn run_tracked(&self, run_id: i64, mode: CrawlMode) -> Result<CrawlStats, CrawlAborted> {
        let marked = lock_catalog(&self.deps.catalog).and_then(|mut store| store.mark_run_running(run_id));
        if let Err(e) = marked {
            tracing::warn!("Failed to mark run {} as running: {}", run_id, e);
        }

        let result = self.run(mode).await;

        let recorded = match &result {
            Ok(stats) => lock_catalog(&self.deps.catalog)
                .and_then(|mut store| store.finish_run(run_id, RunStatus::Completed, stats, None)),
            Err(aborted) => {
                let message = aborted.source.to_string();
                lock_catalog(&self.deps.catalog).and_then(|mut store| {
                    store.finish_run(run_id, RunStatus::Failed, &aborted.stats, Some(&message))
                })
            }
        };
        if let Err(e) = recorded {
            tracing::error!("Failed to record outcome of run {}: {}", run_id, e);
        }

        result
    }
}

fn abort(stats: CrawlStats, source: SearchError) -> CrawlAborted {
    tracing::error!("Crawl aborted: {} ({})", source, stats);
    CrawlAborted { stats, source }
}
