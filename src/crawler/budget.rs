//! Per-run work budget
//!
//! A run stops claiming new work once it has fetched `max_hits` documents or
//! its wall-clock deadline has passed. Work already claimed is finished.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RunBudget {
    max_hits: u64,
    claimed: u64,
    deadline: Option<Instant>,
}

impl RunBudget {
    /// Creates a budget starting now
    pub fn new(max_hits: u32, max_duration: Option<Duration>) -> Self {
        Self::starting_at(max_hits, max_duration, Instant::now())
    }

    pub fn starting_at(max_hits: u32, max_duration: Option<Duration>, start: Instant) -> Self {
        Self {
            max_hits: u64::from(max_hits),
            claimed: 0,
            // A deadline past what `Instant` can represent is no deadline
            deadline: max_duration.and_then(|d| start.checked_add(d)),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.is_exhausted_at(Instant::now())
    }

    pub fn is_exhausted_at(&self, now: Instant) -> bool {
        self.claimed >= self.max_hits || self.deadline.map_or(false, |deadline| now >= deadline)
    }

    /// Claims one unit of work; false once the budget is spent
    pub fn try_claim(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.claimed += 1;
        true
    }

    pub fn claimed(&self) -> u64 {
        self.claimed
    }

    pub fn remaining(&self) -> u64 {
        self.max_hits.saturating_sub(self.claimed)
    }
}
