//! policy-atlas: an incremental crawler for AI-assistant policy files
//!
//! This crate discovers GitHub repositories containing policy files such as
//! `CLAUDE.md` or `.cursorrules`, fetches their content, and keeps a SQLite
//! catalog up to date across runs without refetching unchanged data.

pub mod config;
pub mod content;
pub mod crawler;
pub mod fingerprint;
pub mod output;
pub mod schedule;
pub mod scoring;
pub mod search;
pub mod storage;
pub mod tasks;

use thiserror::Error;

/// Main error type for policy-atlas operations
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search API error: {0}")]
    Search(#[from] search::SearchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{0}")]
    Aborted(#[from] crawler::CrawlAborted),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid filename pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing API credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Result type alias for policy-atlas operations
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlMode, CrawlStats, Orchestrator};
pub use search::{CodeSearch, GitHubClient};
pub use storage::{CatalogStore, SqliteCatalog};
