//! Statistics generation from the catalog
//!
//! This module provides functionality for extracting and displaying
//! catalog statistics and per-run counters.

use crate::crawler::CrawlStats;
use crate::storage::{CatalogStore, RunRecord, StorageResult};
use crate::tasks::TaskStatus;

/// Catalog statistics summary
#[derive(Debug, Clone)]
pub struct CatalogStatistics {
    /// Total number of repositories in the catalog
    pub repositories: u64,

    /// Total number of policy documents
    pub documents: u64,

    /// Documents whose current content has no score yet
    pub pending_scoring: u64,

    /// Repositories never rechecked by the update pass
    pub never_crawled: u64,

    /// Document counts per filename, most common first
    pub by_filename: Vec<(String, u64)>,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from the catalog
pub fn load_statistics(store: &dyn CatalogStore) -> StorageResult<CatalogStatistics> {
    Ok(CatalogStatistics {
        repositories: store.count_repositories()?,
        documents: store.count_documents()?,
        pending_scoring: store.count_pending_scoring()?,
        never_crawled: store.count_never_crawled()?,
        by_filename: store.documents_by_filename()?,
        latest_run: store.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Repositories: {}", stats.repositories);
    println!("  Policy documents: {}", stats.documents);
    println!("  Awaiting scoring: {}", stats.pending_scoring);
    println!("  Never rechecked: {}", stats.never_crawled);
    println!();

    if !stats.by_filename.is_empty() {
        println!("Documents by Filename:");
        for (filename, count) in &stats.by_filename {
            let percentage = if stats.documents > 0 {
                (*count as f64 / stats.documents as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", filename, count, percentage);
        }
        println!();
    }

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  #{} {} ({})", run.id, run.mode, run.status.to_db_string());
            println!("  Queued: {}", run.queued_at.to_rfc3339());
            if let Some(finished) = run.finished_at {
                println!("  Finished: {}", finished.to_rfc3339());
            }
            if let Some(error) = &run.error_message {
                println!("  Error: {}", error);
            }
            print_crawl_stats(&run.stats);
        }
        None => println!("No crawl runs recorded yet."),
    }
}

/// Prints the counters of a single run
pub fn print_crawl_stats(stats: &CrawlStats) {
    println!("  Searched: {}", stats.searched);
    println!(
        "  Processed: {} (created {}, updated {})",
        stats.processed, stats.created, stats.updated
    );
    println!("  Skipped: {}", stats.skipped);
    println!("  Filtered: {}", stats.filtered);
    println!("  Errors: {}", stats.errors);
    println!("  Repositories checked: {}", stats.repos_checked);
    if stats.rate_limited {
        println!("  Stopped early: rate limited");
    }
    if stats.budget_exhausted {
        println!("  Stopped early: run budget exhausted");
    }
}

/// Prints the state of a triggered run as JSON
pub fn print_task_status(status: &TaskStatus) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(())
}
