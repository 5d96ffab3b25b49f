//! GitHub REST implementation of [`CodeSearch`]
//!
//! Every request goes through one retry loop that:
//! - Reserves quota from the shared [`RateBudget`] before sending
//! - Feeds the `x-ratelimit-*` headers of each response back into the budget
//! - Retries transport failures, unreadable bodies, and 5xx responses with
//!   exponential backoff
//! - Waits out (or reports) rate-limit responses
//! - Classifies everything else into a [`SearchError`]

use super::{
    CandidateHit, CodeSearch, FilenamePattern, RateBudget, RateResource, RepoMetadata,
    SearchError, SearchPage, SearchResult,
};
use crate::config::GitHubConfig;
use crate::content::decode_text;
use crate::{AtlasError, ConfigError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Code search never returns results past this offset
const SEARCH_RESULT_CAP: u64 = 1000;

/// Wait applied to a rate-limit response that carries no reset hint
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw+json";
const API_VERSION: &str = "2022-11-28";

/// Resolved client settings
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_url: Url,
    pub user_agent: String,
    pub per_page: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub min_remaining: u32,
    pub max_rate_limit_wait: Duration,
}

impl GitHubSettings {
    pub fn from_config(config: &GitHubConfig) -> Result<Self, ConfigError> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api-url: {}", e)))?;

        Ok(Self {
            api_url,
            user_agent: config.user_agent.clone(),
            per_page: config.per_page,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            min_remaining: config.min_remaining,
            max_rate_limit_wait: Duration::from_secs(config.max_rate_limit_wait_secs),
        })
    }
}

/// Builds the HTTP client used for all API calls
///
/// The token is installed as a default `Authorization` header and marked
/// sensitive so it never shows up in debug output.
pub fn build_http_client(settings: &GitHubSettings, token: &str) -> crate::Result<Client> {
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        AtlasError::Config(ConfigError::Validation(
            "API token contains characters not allowed in a header".to_string(),
        ))
    })?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);
    headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

    let client = Client::builder()
        .user_agent(settings.user_agent.clone())
        .default_headers(headers)
        .timeout(settings.timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(5)) // renamed repositories answer with a redirect
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// GitHub REST API client
pub struct GitHubClient {
    http: Client,
    settings: GitHubSettings,
    budget: Arc<RateBudget>,
}

impl GitHubClient {
    pub fn new(settings: GitHubSettings, token: &str) -> crate::Result<Self> {
        let http = build_http_client(&settings, token)?;
        let budget = Arc::new(RateBudget::new(
            settings.min_remaining,
            settings.max_rate_limit_wait,
        ));

        Ok(Self {
            http,
            settings,
            budget,
        })
    }

    pub fn from_config(config: &GitHubConfig, token: &str) -> crate::Result<Self> {
        Self::new(GitHubSettings::from_config(config)?, token)
    }

    /// The quota tracker shared by this client's requests
    pub fn budget(&self) -> Arc<RateBudget> {
        Arc::clone(&self.budget)
    }

    fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> SearchResult<Url> {
        let mut url = self.settings.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SearchError::Api {
                status: 0,
                context: self.settings.api_url.to_string(),
                message: "API URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a GET with retry, backoff, and rate-limit handling
    ///
    /// Returns the body of the first successful response. A body that fails
    /// mid-read counts as a transient failure like a dropped connection.
    async fn get(
        &self,
        resource: RateResource,
        url: Url,
        accept: &'static str,
        context: &str,
    ) -> SearchResult<Vec<u8>> {
        let mut failures = 0u32;
        let mut rate_limit_hits = 0u32;

        loop {
            self.budget.acquire(resource).await?;

            let response = match self.http.get(url.clone()).header(ACCEPT, accept).send().await {
                Ok(response) => response,
                Err(e) => {
                    failures += 1;
                    self.retry_transient(failures, context, describe_request_error(&e))
                        .await?;
                    continue;
                }
            };

            self.observe_quota(resource, response.headers());
            let status = response.status();

            if status.is_success() {
                match response.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(e) => {
                        failures += 1;
                        self.retry_transient(failures, context, describe_request_error(&e))
                            .await?;
                        continue;
                    }
                }
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(SearchError::Auth {
                    status: status.as_u16(),
                    message: error_message(response).await,
                });
            }

            if status == StatusCode::NOT_FOUND {
                return Err(SearchError::NotFound {
                    what: context.to_string(),
                });
            }

            if status.is_server_error() {
                failures += 1;
                self.retry_transient(failures, context, format!("HTTP {}", status.as_u16()))
                    .await?;
                continue;
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                let hint = rate_limit_wait(response.headers(), Utc::now());
                let message = error_message(response).await;
                let limited = status == StatusCode::TOO_MANY_REQUESTS
                    || hint.is_some()
                    || message.to_ascii_lowercase().contains("rate limit");

                if limited {
                    rate_limit_hits += 1;
                    let wait = hint.unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
                    let reset_at = Utc::now()
                        + chrono::Duration::from_std(wait)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    self.budget.mark_exhausted(resource, reset_at);

                    if rate_limit_hits > self.settings.max_retries {
                        return Err(SearchError::RateLimited {
                            resource,
                            reset_at: Some(reset_at),
                        });
                    }

                    tracing::warn!(
                        "Rate limited on {} ({}), retry after {:?}",
                        context,
                        resource,
                        wait
                    );
                    continue;
                }

                return Err(SearchError::Api {
                    status: status.as_u16(),
                    context: context.to_string(),
                    message,
                });
            }

            return Err(SearchError::Api {
                status: status.as_u16(),
                context: context.to_string(),
                message: error_message(response).await,
            });
        }
    }

    /// Gives up once `failures` reaches the retry limit, otherwise backs off
    async fn retry_transient(
        &self,
        failures: u32,
        context: &str,
        message: String,
    ) -> SearchResult<()> {
        if failures >= self.settings.max_retries {
            return Err(SearchError::Transient {
                attempts: failures,
                message,
            });
        }
        self.backoff(failures, context, &message).await;
        Ok(())
    }

    async fn backoff(&self, failures: u32, context: &str, message: &str) {
        let delay = self.settings.retry_backoff * 2u32.saturating_pow(failures - 1);
        tracing::debug!(
            "Transient failure on {} ({}), retry {} in {:?}",
            context,
            message,
            failures,
            delay
        );
        tokio::time::sleep(delay).await;
    }

    fn observe_quota(&self, requested: RateResource, headers: &HeaderMap) {
        let resource = header_str(headers, "x-ratelimit-resource")
            .and_then(RateResource::from_header)
            .unwrap_or(requested);
        let remaining = header_str(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok());
        let reset_at = header_str(headers, "x-ratelimit-reset").and_then(parse_epoch);

        if remaining.is_some() || reset_at.is_some() {
            self.budget.observe(resource, remaining, reset_at);
        }
    }
}

#[async_trait]
impl CodeSearch for GitHubClient {
    async fn search_page(&self, pattern: &FilenamePattern, page: u32) -> SearchResult<SearchPage> {
        let query = format!("filename:{}", pattern.query_term());
        let mut url = self.endpoint(["search", "code"])?;
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("per_page", &self.settings.per_page.to_string())
            .append_pair("page", &page.to_string());

        let context = format!("search {} page {}", query, page);
        let raw = self
            .get(RateResource::Search, url, ACCEPT_JSON, &context)
            .await?;
        let body: CodeSearchResponse = parse_json(&raw, &context)?;

        if body.incomplete_results {
            tracing::debug!("{} returned incomplete results", context);
        }

        let per_page = u64::from(self.settings.per_page);
        let retrievable = body.total_count.min(SEARCH_RESULT_CAP);
        let has_more =
            body.items.len() as u64 == per_page && u64::from(page) * per_page < retrievable;

        let hits = body
            .items
            .into_iter()
            .map(|item| CandidateHit {
                full_name: item.repository.full_name,
                path: item.path,
                filename: item.name,
            })
            .collect();

        Ok(SearchPage {
            hits,
            total_count: body.total_count,
            has_more,
        })
    }

    async fn repository(&self, full_name: &str) -> SearchResult<RepoMetadata> {
        let (owner, name) = split_full_name(full_name)?;
        let url = self.endpoint(["repos", owner, name])?;
        let context = format!("repository {}", full_name);

        let raw = self.get(RateResource::Core, url, ACCEPT_JSON, &context).await?;
        let body: RepositoryResponse = parse_json(&raw, &context)?;

        Ok(RepoMetadata {
            full_name: body.full_name,
            name: body.name,
            stars: body.stargazers_count,
            forks: body.forks_count,
            language: body.language,
            url: body.html_url,
            pushed_at: body.pushed_at,
            default_branch: body.default_branch.unwrap_or_else(|| "main".to_string()),
        })
    }

    async fn fetch_content(&self, full_name: &str, path: &str) -> SearchResult<String> {
        let (owner, name) = split_full_name(full_name)?;
        let segments = ["repos", owner, name, "contents"]
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        let url = self.endpoint(segments)?;
        let context = format!("{}:{}", full_name, path);

        let bytes = self.get(RateResource::Core, url, ACCEPT_RAW, &context).await?;

        decode_text(&bytes).ok_or_else(|| SearchError::ContentDecode {
            path: context.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CodeSearchResponse {
    total_count: u64,
    #[serde(default)]
    incomplete_results: bool,
    #[serde(default)]
    items: Vec<CodeSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CodeSearchItem {
    name: String,
    path: String,
    repository: RepositoryRef,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    full_name: String,
    name: String,
    #[serde(default)]
    stargazers_count: u32,
    #[serde(default)]
    forks_count: u32,
    language: Option<String>,
    html_url: String,
    pushed_at: Option<DateTime<Utc>>,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn split_full_name(full_name: &str) -> SearchResult<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(SearchError::NotFound {
            what: format!("malformed repository name '{}'", full_name),
        }),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &[u8], context: &str) -> SearchResult<T> {
    serde_json::from_slice(raw).map_err(|e| SearchError::Malformed {
        context: context.to_string(),
        message: e.to_string(),
    })
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = value.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Extracts how long a rate-limit response asks us to wait
///
/// `retry-after` wins; otherwise an exhausted `x-ratelimit-remaining` is
/// paired with `x-ratelimit-reset`. Returns `None` when neither is present.
fn rate_limit_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(secs) = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.trim().parse().ok()) {
        return Some(Duration::from_secs(secs));
    }

    if header_str(headers, "x-ratelimit-remaining") == Some("0") {
        let reset_at = header_str(headers, "x-ratelimit-reset").and_then(parse_epoch)?;
        return Some((reset_at - now).to_std().unwrap_or(Duration::ZERO));
    }

    None
}

async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    message.chars().take(200).collect()
}

fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection failed".to_string()
    } else {
        error.to_string()
    }
}
