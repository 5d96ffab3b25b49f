//! Per-resource API quota tracking
//!
//! The API meters search and core (repository / contents) requests in
//! separate windows. [`RateBudget`] remembers what the last response said
//! about each window and makes callers wait for the reset when the remaining
//! quota falls below the configured floor.

use super::{SearchError, SearchResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Margin added after a reset instant before retrying
const RESET_SLACK: Duration = Duration::from_secs(1);

/// A separately metered API resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateResource {
    Core,
    Search,
}

impl RateResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Search => "search",
        }
    }

    /// Parses the `x-ratelimit-resource` header value
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "core" => Some(Self::Core),
            "search" | "code_search" => Some(Self::Search),
            _ => None,
        }
    }
}

impl fmt::Display for RateResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is known about one resource's quota window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaState {
    /// Requests left in the current window, if the API has told us
    pub remaining: Option<u32>,

    /// When the current window resets
    pub reset_at: Option<DateTime<Utc>>,

    /// Requests sent through this budget
    pub requests_made: u64,
}

impl QuotaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how long to wait before the next request, or `None` to go now
    ///
    /// An empty window always waits, whatever `min_remaining` is.
    pub fn time_until_available(&self, min_remaining: u32, now: DateTime<Utc>) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(remaining), Some(reset_at))
                if (remaining == 0 || remaining < min_remaining) && reset_at > now =>
            {
                (reset_at - now).to_std().ok()
            }
            _ => None,
        }
    }

    /// Counts a request and decrements the known remaining quota
    pub fn record_request(&mut self) {
        self.requests_made += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Forgets a window whose reset instant has passed
    fn roll_over(&mut self, now: DateTime<Utc>) {
        if matches!(self.reset_at, Some(reset_at) if reset_at <= now) {
            self.remaining = None;
            self.reset_at = None;
        }
    }
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The request may be sent now; it has been counted
    Granted,
    /// The quota is spent until the window resets
    Wait(Duration),
}

/// Quota tracker shared by every request a client makes
#[derive(Debug)]
pub struct RateBudget {
    quotas: Mutex<HashMap<RateResource, QuotaState>>,
    min_remaining: u32,
    max_wait: Duration,
}

impl RateBudget {
    /// Creates a budget that waits at most `max_wait` for a reset
    pub fn new(min_remaining: u32, max_wait: Duration) -> Self {
        Self {
            quotas: Mutex::new(HashMap::new()),
            min_remaining,
            max_wait,
        }
    }

    fn with_quota<T>(&self, resource: RateResource, f: impl FnOnce(&mut QuotaState) -> T) -> T {
        // A panic while holding the lock leaves plain counters behind, which
        // are still usable.
        let mut quotas = self.quotas.lock().unwrap_or_else(|e| e.into_inner());
        f(quotas.entry(resource).or_default())
    }

    /// Tries to reserve one request against `resource` at time `now`
    pub fn try_reserve(&self, resource: RateResource, now: DateTime<Utc>) -> Reservation {
        let min_remaining = self.min_remaining;
        self.with_quota(resource, |quota| {
            quota.roll_over(now);
            match quota.time_until_available(min_remaining, now) {
                Some(wait) => Reservation::Wait(wait),
                None => {
                    quota.record_request();
                    Reservation::Granted
                }
            }
        })
    }

    /// Waits until a request against `resource` may be sent
    ///
    /// Fails with [`SearchError::RateLimited`] instead of sleeping when the
    /// reset is further away than the configured maximum wait.
    pub async fn acquire(&self, resource: RateResource) -> SearchResult<()> {
        loop {
            match self.try_reserve(resource, Utc::now()) {
                Reservation::Granted => return Ok(()),
                Reservation::Wait(wait) if wait > self.max_wait => {
                    return Err(SearchError::RateLimited {
                        resource,
                        reset_at: self.snapshot(resource).reset_at,
                    });
                }
                Reservation::Wait(wait) => {
                    tracing::warn!(
                        "{} quota exhausted, sleeping {:?} until reset",
                        resource,
                        wait
                    );
                    tokio::time::sleep(wait + RESET_SLACK).await;
                }
            }
        }
    }

    /// Records the quota reported by a response
    pub fn observe(
        &self,
        resource: RateResource,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        self.with_quota(resource, |quota| {
            if remaining.is_some() {
                quota.remaining = remaining;
            }
            if reset_at.is_some() {
                quota.reset_at = reset_at;
            }
        });
    }

    /// Marks the resource as spent until `reset_at`
    pub fn mark_exhausted(&self, resource: RateResource, reset_at: DateTime<Utc>) {
        self.with_quota(resource, |quota| {
            quota.remaining = Some(0);
            quota.reset_at = Some(reset_at);
        });
    }

    pub fn snapshot(&self, resource: RateResource) -> QuotaState {
        self.with_quota(resource, |quota| quota.clone())
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}
