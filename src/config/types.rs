use serde::Deserialize;

/// Main configuration structure for policy-atlas
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// GitHub API client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GitHubConfig {
    /// Base URL of the REST API
    pub api_url: String,

    /// Name of the environment variable holding the API token
    pub token_env: String,

    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Results requested per search page (1-100)
    pub per_page: u32,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Attempts for transient failures before giving up
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    pub retry_backoff_ms: u64,

    /// Remaining-quota floor below which requests wait for the reset
    pub min_remaining: u32,

    /// Longest wait for a quota reset before the call fails (seconds)
    pub max_rate_limit_wait_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            user_agent: format!("policy-atlas/{}", env!("CARGO_PKG_VERSION")),
            per_page: 100,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            min_remaining: 1,
            max_rate_limit_wait_secs: 120,
        }
    }
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlConfig {
    /// Repositories with fewer stars are never fetched
    pub star_threshold: u32,

    /// Maximum number of content fetches in one run
    pub max_hits_per_run: u32,

    /// Wall-clock budget for one run (seconds)
    pub max_run_seconds: Option<u64>,

    /// Repositories crawled more recently than this are not rechecked
    pub update_interval_hours: u64,

    /// Skip refetching documents of repositories not pushed since last crawl
    pub skip_unpushed: bool,

    /// Filename patterns: exact names ("CLAUDE.md") or suffixes ("*.cursorrules")
    pub patterns: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            star_threshold: 50,
            max_hits_per_run: 100,
            max_run_seconds: None,
            update_interval_hours: 24,
            skip_unpushed: true,
            patterns: vec![
                "CLAUDE.md".to_string(),
                "AI_RULES.md".to_string(),
                "AI_POLICY.md".to_string(),
                "*.cursorrules".to_string(),
                "*.cursorule".to_string(),
            ],
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// Periodic invocation cadence for `schedule` mode
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScheduleConfig {
    pub update_every_secs: u64,
    pub discover_every_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_every_secs: 120,
            discover_every_secs: 86_400,
        }
    }
}
