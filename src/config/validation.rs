use crate::config::types::{Config, CrawlConfig, GitHubConfig, ScheduleConfig, StorageConfig};
use crate::search::FilenamePattern;
use crate::ConfigError;
use url::Url;

/// Longest accepted recheck interval (ten years)
const MAX_UPDATE_INTERVAL_HOURS: u64 = 87_600;

/// Longest accepted run (one year)
const MAX_RUN_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_github_config(&config.github)?;
    validate_crawl_config(&config.crawl)?;
    validate_storage_config(&config.storage)?;
    validate_schedule_config(&config.schedule)?;
    Ok(())
}

/// Validates GitHub client configuration
fn validate_github_config(config: &GitHubConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "api-url must be http(s), got '{}'",
            config.api_url
        )));
    }

    if config.token_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "token-env cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.per_page < 1 || config.per_page > 100 {
        return Err(ConfigError::Validation(format!(
            "per-page must be between 1 and 100, got {}",
            config.per_page
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.min_remaining < 1 {
        return Err(ConfigError::Validation(format!(
            "min-remaining must be >= 1, got {}",
            config.min_remaining
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_hits_per_run < 1 {
        return Err(ConfigError::Validation(format!(
            "max-hits-per-run must be >= 1, got {}",
            config.max_hits_per_run
        )));
    }

    if let Some(secs) = config.max_run_seconds {
        if !(1..=MAX_RUN_SECONDS).contains(&secs) {
            return Err(ConfigError::Validation(format!(
                "max-run-seconds must be between 1 and {} when set, got {}",
                MAX_RUN_SECONDS, secs
            )));
        }
    }

    if config.update_interval_hours > MAX_UPDATE_INTERVAL_HOURS {
        return Err(ConfigError::Validation(format!(
            "update-interval-hours must be <= {}, got {}",
            MAX_UPDATE_INTERVAL_HOURS, config.update_interval_hours
        )));
    }

    if config.patterns.is_empty() {
        return Err(ConfigError::Validation(
            "at least one filename pattern is required".to_string(),
        ));
    }

    for pattern in &config.patterns {
        FilenamePattern::parse(pattern)?;
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.update_every_secs == 0 || config.discover_every_secs == 0 {
        return Err(ConfigError::Validation(
            "schedule intervals must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}
