//! In-memory fakes for the CI system and the root-cause lookup (testing only)
//!
//! `MemoryCiStatus` and `StaticRootCauseLookup` satisfy the collaborator
//! contracts without network access and can be scripted to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use cireport_state::{JobFamily, Run, RunId};
use futures::stream::{self, BoxStream, StreamExt};

use crate::ci::{CiResult, CiStatusSource, RawRunState};
use crate::error::{CiError, LookupError};
use crate::rca::{FailureSignature, LookupResult, RootCauseLookup};

// ---------------------------------------------------------------------------
// MemoryCiStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CiState {
    latest: HashMap<JobFamily, RunId>,
    runs: HashMap<(JobFamily, RunId), RawRunState>,
    /// Remaining scripted `run_state` faults per run.
    faults: HashMap<(JobFamily, RunId), u32>,
    unavailable: HashSet<JobFamily>,
    run_state_calls: HashMap<(JobFamily, RunId), usize>,
}

/// In-memory CI job-status API.
///
/// Runs below the latest id that were never registered are reported as
/// `RunNotFound`, like a build whose artifacts have not been uploaded yet.
#[derive(Debug, Default)]
pub struct MemoryCiStatus {
    state: Mutex<CiState>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryCiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CiState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the latest known id of `family`.
    pub fn with_latest(self, family: &JobFamily, latest: RunId) -> Self {
        self.lock().latest.insert(family.clone(), latest);
        self
    }

    /// Register the state of one run, raising the latest id if needed.
    pub fn with_run(self, family: &JobFamily, id: RunId, state: RawRunState) -> Self {
        self.add_run(family, id, state);
        self
    }

    /// Same as [`MemoryCiStatus::with_run`] on a shared instance, e.g. to
    /// simulate runs landing between two pipeline invocations.
    pub fn add_run(&self, family: &JobFamily, id: RunId, state: RawRunState) {
        let mut ci = self.lock();
        ci.runs.insert((family.clone(), id), state);
        let latest = ci.latest.entry(family.clone()).or_default();
        *latest = (*latest).max(id);
    }

    /// Delay every call, to observe concurrency across families.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `times` state reads of one run.
    pub fn fail_run_state(&self, family: &JobFamily, id: RunId, times: u32) {
        self.lock().faults.insert((family.clone(), id), times);
    }

    /// Make every call for `family` fail with `CiError::Unavailable`.
    pub fn make_unavailable(&self, family: &JobFamily) {
        self.lock().unavailable.insert(family.clone());
    }

    pub fn run_state_calls(&self, family: &JobFamily, id: RunId) -> usize {
        self.lock()
            .run_state_calls
            .get(&(family.clone(), id))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CiStatusSource for MemoryCiStatus {
    async fn latest_known_id(&self, family: &JobFamily) -> CiResult<RunId> {
        self.simulate_latency().await;
        let ci = self.lock();
        if ci.unavailable.contains(family) {
            return Err(CiError::Unavailable(format!("{family}: connection refused")));
        }
        ci.latest
            .get(family)
            .copied()
            .ok_or_else(|| CiError::UnknownFamily {
                family: family.clone(),
            })
    }

    async fn run_state(&self, family: &JobFamily, id: RunId) -> CiResult<RawRunState> {
        self.simulate_latency().await;
        let mut ci = self.lock();
        let key = (family.clone(), id);
        *ci.run_state_calls.entry(key.clone()).or_default() += 1;

        if ci.unavailable.contains(family) {
            return Err(CiError::Unavailable(format!("{family}: connection refused")));
        }
        if let Some(remaining) = ci.faults.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CiError::Unavailable(format!("{family} run {id}: 502")));
            }
        }
        ci.runs.get(&key).copied().ok_or(CiError::RunNotFound {
            family: family.clone(),
            run_id: id,
        })
    }
}

// ---------------------------------------------------------------------------
// StaticRootCauseLookup
// ---------------------------------------------------------------------------

/// Lookup service answering from a fixed table of signatures per run.
#[derive(Debug, Default)]
pub struct StaticRootCauseLookup {
    failures: Mutex<HashMap<(JobFamily, RunId), Vec<FailureSignature>>>,
    /// Upcoming enumerations that fault after their first signature.
    fail_next: AtomicUsize,
    invocations: AtomicUsize,
}

impl StaticRootCauseLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(
        self,
        family: &JobFamily,
        id: RunId,
        signatures: Vec<FailureSignature>,
    ) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((family.clone(), id), signatures);
        self
    }

    /// Make the next `times` enumerations fault part-way through.
    pub fn fail_next(&self, times: usize) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    /// Number of `find_failures` calls made.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl RootCauseLookup for StaticRootCauseLookup {
    fn find_failures<'a>(&'a self, run: &'a Run) -> BoxStream<'a, LookupResult<FailureSignature>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let signatures = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(run.family.clone(), run.id))
            .cloned()
            .unwrap_or_default();

        let faulty = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if faulty {
            let fault = Err(LookupError::Unavailable(format!(
                "artifacts of {} run {} unreachable",
                run.family, run.id
            )));
            stream::iter(signatures.into_iter().take(1).map(Ok).chain([fault])).boxed()
        } else {
            stream::iter(signatures.into_iter().map(Ok)).boxed()
        }
    }
}
