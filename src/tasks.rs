//! Background crawl triggering
//!
//! [`TaskRunner::trigger`] records a queued run and spawns it on the tokio
//! runtime, returning at once. [`TaskRunner::status`] reads the persisted run
//! row, so a status check works from any process sharing the database.

use crate::crawler::{CrawlMode, CrawlStats, Orchestrator};
use crate::storage::{lock_catalog, RunRecord, RunStatus, StorageResult};
use serde::Serialize;
use std::sync::Arc;

/// Acknowledgement returned when a run is queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReceipt {
    pub status: &'static str,
    pub task_id: i64,
    pub mode: CrawlMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl From<RunStatus> for TaskState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued => Self::Pending,
            RunStatus::Running => Self::Progress,
            RunStatus::Completed => Self::Success,
            RunStatus::Failed => Self::Failure,
        }
    }
}

/// Current view of a triggered run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: i64,
    pub state: TaskState,
    pub mode: CrawlMode,
    /// Final counters, present once the run has finished
    pub result: Option<CrawlStats>,
    pub error: Option<String>,
}

impl From<RunRecord> for TaskStatus {
    fn from(run: RunRecord) -> Self {
        let state = TaskState::from(run.status);
        let result = run.status.is_terminal().then_some(run.stats);
        Self {
            task_id: run.id,
            state,
            mode: run.mode,
            result,
            error: run.error_message,
        }
    }
}

pub struct TaskRunner {
    orchestrator: Arc<Orchestrator>,
    config_hash: String,
}

impl TaskRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, config_hash: impl Into<String>) -> Self {
        Self {
            orchestrator,
            config_hash: config_hash.into(),
        }
    }

    /// Queues a run and starts it in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, mode: CrawlMode) -> StorageResult<TriggerReceipt> {
        let task_id = self.orchestrator.queue_run(mode, &self.config_hash)?;
        tracing::info!("Queued {} run {}", mode, task_id);

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            run_in_background(&orchestrator, task_id, mode).await;
        });

        Ok(TriggerReceipt {
            status: "queued",
            task_id,
            mode,
        })
    }

    pub fn status(&self, task_id: i64) -> StorageResult<TaskStatus> {
        let store = lock_catalog(self.orchestrator.catalog())?;
        Ok(TaskStatus::from(store.get_run(task_id)?))
    }
}

/// Runs a queued run to completion and reports how it ended
///
/// Returns false when the run row does not hold a finished state afterwards,
/// leaving status checks with a stale answer.
async fn run_in_background(orchestrator: &Orchestrator, task_id: i64, mode: CrawlMode) -> bool {
    match orchestrator.run_tracked(task_id, mode).await {
        Ok(stats) => tracing::info!("Background {} run {} finished: {}", mode, task_id, stats),
        Err(aborted) => tracing::error!("Background {} run {} failed: {}", mode, task_id, aborted),
    }

    let recorded = lock_catalog(orchestrator.catalog()).and_then(|store| store.get_run(task_id));
    match recorded {
        Ok(run) if run.status.is_terminal() => true,
        Ok(run) => {
            tracing::error!(
                "Run {} ended but is still recorded as {}",
                task_id,
                run.status.to_db_string()
            );
            false
        }
        Err(e) => {
            tracing::error!("Run {} ended but its outcome was not recorded: {}", task_id, e);
            false
        }
    }
}
