//! CI system collaborator and the run result fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use cireport_state::{ComputedResult, JobFamily, RunId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controls::{call_with_controls, CallControls};
use crate::error::CiError;

/// Result type for CI system calls.
pub type CiResult<T> = std::result::Result<T, CiError>;

/// Terminal (or not yet terminal) state of a run as reported by CI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawRunState {
    Passed,
    Failed,
    /// Still running, or queued.
    Pending,
}

impl From<RawRunState> for ComputedResult {
    fn from(state: RawRunState) -> Self {
        match state {
            RawRunState::Passed => ComputedResult::Passed,
            RawRunState::Failed => ComputedResult::Failed,
            RawRunState::Pending => ComputedResult::Pending,
        }
    }
}

/// Injectable job-status API of the CI system.
#[async_trait]
pub trait CiStatusSource: Send + Sync {
    /// Highest run id the CI system knows for `family`.
    async fn latest_known_id(&self, family: &JobFamily) -> CiResult<RunId>;

    /// Current state of one run.
    async fn run_state(&self, family: &JobFamily, id: RunId) -> CiResult<RawRunState>;
}

/// What the fetcher learned about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    State(RawRunState),
    /// The state could not be retrieved within the retry budget.
    Indeterminate { reason: String },
}

/// Retrieves the completion state of individual runs.
pub struct RunResultFetcher {
    ci: Arc<dyn CiStatusSource>,
    controls: CallControls,
}

impl RunResultFetcher {
    pub fn new(ci: Arc<dyn CiStatusSource>, controls: CallControls) -> Self {
        Self { ci, controls }
    }

    /// Fetch the state of run `id`.
    ///
    /// A run the CI system has not materialised yet is `Pending`, not a fault.
    /// Retrieval faults are retried, then reported as `Indeterminate`.
    pub async fn fetch(&self, family: &JobFamily, id: RunId) -> FetchOutcome {
        let ci = &self.ci;
        let result = call_with_controls(&self.controls, "run_state", move || async move {
            match ci.run_state(family, id).await {
                Err(CiError::RunNotFound { .. }) => Ok(RawRunState::Pending),
                other => other,
            }
        })
        .await;

        match result {
            Ok(state) => {
                debug!(family = %family, run_id = %id, state = ?state, "run state fetched");
                FetchOutcome::State(state)
            }
            Err(failure) => FetchOutcome::Indeterminate {
                reason: failure.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryCiStatus;

    fn controls() -> CallControls {
        CallControls {
            timeout_ms: 1_000,
            max_retries: 1,
            backoff_base_ms: 1,
        }
    }

    #[test]
    fn test_raw_state_maps_to_computed_result() {
        assert_eq!(ComputedResult::from(RawRunState::Passed), ComputedResult::Passed);
        assert_eq!(ComputedResult::from(RawRunState::Failed), ComputedResult::Failed);
        assert_eq!(ComputedResult::from(RawRunState::Pending), ComputedResult::Pending);
    }

    #[tokio::test]
    async fn test_fetch_reports_state() {
        let family = JobFamily::new("e2e");
        let ci = Arc::new(MemoryCiStatus::new().with_run(&family, RunId(4), RawRunState::Failed));
        let fetcher = RunResultFetcher::new(ci, controls());

        assert_eq!(
            fetcher.fetch(&family, RunId(4)).await,
            FetchOutcome::State(RawRunState::Failed)
        );
    }

    #[tokio::test]
    async fn test_unknown_run_is_pending() {
        let family = JobFamily::new("e2e");
        let ci = Arc::new(MemoryCiStatus::new().with_latest(&family, RunId(9)));
        let fetcher = RunResultFetcher::new(ci.clone(), controls());

        assert_eq!(
            fetcher.fetch(&family, RunId(9)).await,
            FetchOutcome::State(RawRunState::Pending)
        );
        assert_eq!(ci.run_state_calls(&family, RunId(9)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fault_is_retried() {
        let family = JobFamily::new("e2e");
        let ci = Arc::new(MemoryCiStatus::new().with_run(&family, RunId(4), RawRunState::Passed));
        ci.fail_run_state(&family, RunId(4), 1);
        let fetcher = RunResultFetcher::new(ci.clone(), controls());

        assert_eq!(
            fetcher.fetch(&family, RunId(4)).await,
            FetchOutcome::State(RawRunState::Passed)
        );
        assert_eq!(ci.run_state_calls(&family, RunId(4)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_fault_is_indeterminate() {
        let family = JobFamily::new("e2e");
        let ci = Arc::new(MemoryCiStatus::new().with_run(&family, RunId(4), RawRunState::Passed));
        ci.fail_run_state(&family, RunId(4), 5);
        let fetcher = RunResultFetcher::new(ci, controls());

        match fetcher.fetch(&family, RunId(4)).await {
            FetchOutcome::Indeterminate { reason } => assert!(reason.contains("2 attempt")),
            other => panic!("expected Indeterminate, got {:?}", other),
        }
    }
}
