//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryTrackingSheet`, which satisfies the `TrackingSheet`
//! contract without any external dependencies and can be scripted to fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{JobFamily, RunId, SheetRow};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryTrackingSheet
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SheetState {
    rows: HashMap<JobFamily, Vec<SheetRow>>,
    /// Watermarks seeded without rows, as if recorded by an earlier tool.
    seeded: HashMap<JobFamily, RunId>,
    reject_appends: HashMap<(JobFamily, RunId), String>,
    unavailable: HashSet<JobFamily>,
    append_calls: usize,
}

impl SheetState {
    fn watermark(&self, family: &JobFamily) -> Option<RunId> {
        let from_rows = self
            .rows
            .get(family)
            .and_then(|rows| rows.iter().map(|r| r.run_id()).max());
        from_rows.max(self.seeded.get(family).copied())
    }
}

/// In-memory tracking sheet backed by a `HashMap<family, rows>`.
///
/// Appends at or below the family's watermark are refused with
/// `StorageError::OutOfOrderAppend`, so tests observe any ordering bug.
#[derive(Debug, Default)]
pub struct MemoryTrackingSheet {
    state: Mutex<SheetState>,
}

impl MemoryTrackingSheet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SheetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pretend `family` was already recorded up to `watermark`.
    pub fn with_watermark(self, family: &JobFamily, watermark: RunId) -> Self {
        self.lock().seeded.insert(family.clone(), watermark);
        self
    }

    /// Reject the append of `run_id` in `family` with `reason`.
    pub fn reject_append(&self, family: &JobFamily, run_id: RunId, reason: &str) {
        self.lock()
            .reject_appends
            .insert((family.clone(), run_id), reason.to_string());
    }

    /// Make every call touching `family` fail with `StorageError::Unavailable`.
    pub fn make_unavailable(&self, family: &JobFamily) {
        self.lock().unavailable.insert(family.clone());
    }

    /// Run ids recorded for `family`, in append order.
    pub fn recorded_ids(&self, family: &JobFamily) -> Vec<RunId> {
        self.lock()
            .rows
            .get(family)
            .map(|rows| rows.iter().map(|r| r.run_id()).collect())
            .unwrap_or_default()
    }

    /// Number of `append_row` calls made, successful or not.
    pub fn append_calls(&self) -> usize {
        self.lock().append_calls
    }
}

#[async_trait]
impl TrackingSheet for MemoryTrackingSheet {
    async fn latest_recorded_id(&self, family: &JobFamily) -> StorageResult<Option<RunId>> {
        let state = self.lock();
        if state.unavailable.contains(family) {
            return Err(StorageError::Unavailable(format!(
                "sheet for {family} is unreachable"
            )));
        }
        Ok(state.watermark(family))
    }

    async fn append_row(&self, row: SheetRow) -> StorageResult<()> {
        let mut state = self.lock();
        state.append_calls += 1;
        let family = row.family().clone();
        let run_id = row.run_id();

        if state.unavailable.contains(&family) {
            return Err(StorageError::Unavailable(format!(
                "sheet for {family} is unreachable"
            )));
        }
        if let Some(reason) = state.reject_appends.get(&(family.clone(), run_id)) {
            return Err(StorageError::AppendRejected {
                family,
                run_id,
                reason: reason.clone(),
            });
        }
        if let Some(watermark) = state.watermark(&family) {
            if run_id <= watermark {
                return Err(StorageError::OutOfOrderAppend {
                    family,
                    run_id,
                    watermark,
                });
            }
        }

        debug!(family = %family, run_id = %run_id, "row appended");
        state.rows.entry(family).or_default().push(row);
        Ok(())
    }

    async fn rows(&self, family: &JobFamily) -> StorageResult<Vec<SheetRow>> {
        Ok(self.lock().rows.get(family).cloned().unwrap_or_default())
    }
}
