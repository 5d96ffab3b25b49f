//! Configuration module for policy-atlas
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The API credential never lives in the file; it is read from the environment
//! variable named by `github.token-env`.
//!
//! # Example
//!
//! ```no_run
//! use policy_atlas::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("atlas.toml")).unwrap();
//! println!("Star threshold: {}", config.crawl.star_threshold);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{Config, CrawlConfig, GitHubConfig, ScheduleConfig, StorageConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, resolve_token};
