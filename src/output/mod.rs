//! Output module for reporting on the catalog and on runs
//!
//! This module handles:
//! - Summarizing catalog contents
//! - Printing per-run counters and task states

pub mod stats;

pub use stats::{
    load_statistics, print_crawl_stats, print_statistics, print_task_status, CatalogStatistics,
};
