//! Per-family reconciliation worker.
//!
//! A worker drives one job family through
//! `Start → RangeResolved → (Fetching → Classifying → Recorded)* → Done`.
//! Runs are processed and appended strictly in ascending id order, so the
//! sheet watermark only ever advances and an interrupted pass can be resumed
//! from the lowest unrecorded id.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cireport_state::{ComputedResult, JobFamily, Run, RunId, SheetRow, TrackingSheet};
use futures::FutureExt;
use tracing::{info, warn};

use crate::ci::{FetchOutcome, RunResultFetcher};
use crate::config::{FetchFaultPolicy, ReconcileConfig};
use crate::controls::call_with_controls;
use crate::error::{ReconcileError, ReconcileResult};
use crate::range::RangeResolver;
use crate::rca::RootCauseClassifier;

/// How a family's pass ended.
#[derive(Debug)]
pub enum FamilyOutcome {
    /// Nothing new since the last recorded run.
    UpToDate,
    /// Every selected run was appended.
    Done { appended: Vec<RunId> },
    /// Stopped before `next` because its state could not be retrieved.
    Deferred {
        appended: Vec<RunId>,
        next: RunId,
        reason: String,
    },
    /// A fatal fault ended the pass; rows already appended stay.
    ///
    /// A panic while recording runs is reported here too, with the rows
    /// appended before it.
    Failed {
        appended: Vec<RunId>,
        error: ReconcileError,
    },
}

impl FamilyOutcome {
    /// Runs appended during the pass, in append order.
    pub fn appended(&self) -> &[RunId] {
        match self {
            FamilyOutcome::UpToDate => &[],
            FamilyOutcome::Done { appended }
            | FamilyOutcome::Deferred { appended, .. }
            | FamilyOutcome::Failed { appended, .. } => appended,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FamilyOutcome::Failed { .. })
    }
}

/// Where the per-run loop stopped.
enum Stop {
    Finished,
    Deferred { next: RunId, reason: String },
}

/// Reconciles one job family end to end.
pub struct ReconcileWorker {
    family: JobFamily,
    config: Arc<ReconcileConfig>,
    sheet: Arc<dyn TrackingSheet>,
    resolver: RangeResolver,
    fetcher: RunResultFetcher,
    classifier: RootCauseClassifier,
}

impl ReconcileWorker {
    pub fn new(
        family: JobFamily,
        config: Arc<ReconcileConfig>,
        sheet: Arc<dyn TrackingSheet>,
        resolver: RangeResolver,
        fetcher: RunResultFetcher,
        classifier: RootCauseClassifier,
    ) -> Self {
        Self {
            family,
            config,
            sheet,
            resolver,
            fetcher,
            classifier,
        }
    }

    pub fn family(&self) -> &JobFamily {
        &self.family
    }

    /// Run the pass to completion or to its first fatal fault.
    pub async fn run(self) -> FamilyOutcome {
        info!(event = "family.started", family = %self.family);

        let ids = match self.plan().await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(event = "family.failed", family = %self.family, error = %error);
                return FamilyOutcome::Failed {
                    appended: Vec::new(),
                    error,
                };
            }
        };

        if ids.is_empty() {
            info!(event = "family.up_to_date", family = %self.family);
            return FamilyOutcome::UpToDate;
        }

        info!(
            event = "family.range_resolved",
            family = %self.family,
            first = %ids[0],
            last = %ids[ids.len() - 1],
            count = ids.len(),
            "updating sheet"
        );

        let mut appended = Vec::with_capacity(ids.len());
        let recorded = AssertUnwindSafe(self.record_all(&ids, &mut appended))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ReconcileError::WorkerPanicked {
                    family: self.family.clone(),
                    detail: panic_detail(&*payload),
                })
            });

        match recorded {
            Ok(Stop::Finished) => {
                info!(event = "family.done", family = %self.family, appended = appended.len());
                FamilyOutcome::Done { appended }
            }
            Ok(Stop::Deferred { next, reason }) => {
                warn!(
                    event = "family.deferred",
                    family = %self.family,
                    next = %next,
                    reason = %reason,
                    appended = appended.len()
                );
                FamilyOutcome::Deferred {
                    appended,
                    next,
                    reason,
                }
            }
            Err(error) => {
                warn!(
                    event = "family.failed",
                    family = %self.family,
                    error = %error,
                    appended = appended.len()
                );
                FamilyOutcome::Failed { appended, error }
            }
        }
    }

    /// Ids to reconcile, ascending: the explicit selection if configured,
    /// otherwise the resolved range.
    async fn plan(&self) -> ReconcileResult<Vec<RunId>> {
        match &self.config.selection {
            Some(selection) => {
                self.resolver
                    .resolve_selection(&self.family, selection)
                    .await
            }
            None => Ok(self.resolver.resolve(&self.family).await?.ids().collect()),
        }
    }

    async fn record_all(&self, ids: &[RunId], appended: &mut Vec<RunId>) -> ReconcileResult<Stop> {
        for &id in ids {
            let raw = match self.fetcher.fetch(&self.family, id).await {
                FetchOutcome::State(state) => ComputedResult::from(state),
                FetchOutcome::Indeterminate { reason } => match self.config.fetch_fault_policy {
                    FetchFaultPolicy::Halt => return Ok(Stop::Deferred { next: id, reason }),
                    FetchFaultPolicy::RecordPending => {
                        warn!(
                            family = %self.family,
                            run_id = %id,
                            reason = %reason,
                            "run state unknown, recording as pending"
                        );
                        ComputedResult::Pending
                    }
                },
            };

            let run = self.classify(Run::new(self.family.clone(), id, raw)).await?;
            self.append(run).await?;
            appended.push(id);
        }
        Ok(Stop::Finished)
    }

    async fn classify(&self, run: Run) -> ReconcileResult<Run> {
        if !RootCauseClassifier::needs_classification(run.result) {
            return Ok(run);
        }
        let summary =
            self.classifier
                .classify(&run)
                .await
                .map_err(|source| ReconcileError::Classify {
                    family: self.family.clone(),
                    run_id: run.id,
                    source,
                })?;
        Ok(summary.apply(run))
    }

    /// Single attempt under the call timeout.
    async fn append(&self, run: Run) -> ReconcileResult<()> {
        let (run_id, result) = (run.id, run.result);
        let root_cause = run.root_cause.join("; ");
        let row = SheetRow::new(run, self.config.operator.clone());
        let controls = self.config.call_controls.without_retries();
        let sheet = &self.sheet;

        call_with_controls(&controls, "append_row", move || sheet.append_row(row.clone()))
            .await
            .map_err(|source| ReconcileError::Append {
                family: self.family.clone(),
                run_id,
                source,
            })?;

        info!(
            event = "run.recorded",
            family = %self.family,
            run_id = %run_id,
            result = %result,
            root_cause = %root_cause
        );
        Ok(())
    }
}

/// Message carried by a panic payload, if it is a string.
pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::RawRunState;
    use crate::controls::CallControls;
    use crate::fakes::{MemoryCiStatus, StaticRootCauseLookup};
    use crate::orchestrator::Orchestrator;
    use async_trait::async_trait;
    use cireport_state::fakes::MemoryTrackingSheet;
    use cireport_state::StorageResult;

    /// Sheet that panics when asked to append one specific run.
    struct PanicOnAppend {
        inner: MemoryTrackingSheet,
        poisoned: RunId,
    }

    #[async_trait]
    impl TrackingSheet for PanicOnAppend {
        async fn latest_recorded_id(&self, family: &JobFamily) -> StorageResult<Option<RunId>> {
            self.inner.latest_recorded_id(family).await
        }

        async fn append_row(&self, row: SheetRow) -> StorageResult<()> {
            if row.run_id() == self.poisoned {
                panic!("sheet client crashed on run {}", self.poisoned);
            }
            self.inner.append_row(row).await
        }

        async fn rows(&self, family: &JobFamily) -> StorageResult<Vec<SheetRow>> {
            self.inner.rows(family).await
        }
    }

    fn fast_config(family: &JobFamily) -> ReconcileConfig {
        ReconcileConfig::default()
            .with_known_families(vec![family.clone()])
            .with_operator("tester")
            .with_call_controls(CallControls {
                timeout_ms: 1_000,
                max_retries: 0,
                backoff_base_ms: 1,
            })
    }

    #[tokio::test]
    async fn test_worker_records_in_ascending_order() {
        let family = JobFamily::new("e2e-openstack-4.2");
        let sheet = Arc::new(MemoryTrackingSheet::new().with_watermark(&family, RunId(4)));
        let ci = Arc::new(MemoryCiStatus::new());
        for id in (5..=7).rev() {
            ci.add_run(&family, RunId(id), RawRunState::Passed);
        }
        let orchestrator = Orchestrator::new(
            fast_config(&family),
            sheet.clone(),
            ci,
            Arc::new(StaticRootCauseLookup::new()),
        );

        let worker = orchestrator.worker(family.clone());
        assert_eq!(worker.family(), &family);
        let outcome = worker.run().await;

        assert_eq!(outcome.appended(), &[RunId(5), RunId(6), RunId(7)]);
        assert!(!outcome.is_failed());
        assert_eq!(
            sheet.recorded_ids(&family),
            vec![RunId(5), RunId(6), RunId(7)]
        );
    }

    #[tokio::test]
    async fn test_worker_fails_when_watermark_unreadable() {
        let family = JobFamily::new("e2e-openstack-4.2");
        let sheet = Arc::new(MemoryTrackingSheet::new());
        sheet.make_unavailable(&family);
        let ci = Arc::new(MemoryCiStatus::new().with_run(&family, RunId(1), RawRunState::Passed));
        let orchestrator = Orchestrator::new(
            fast_config(&family),
            sheet,
            ci.clone(),
            Arc::new(StaticRootCauseLookup::new()),
        );

        let outcome = orchestrator.worker(family.clone()).run().await;

        assert!(matches!(
            outcome,
            FamilyOutcome::Failed {
                error: ReconcileError::Watermark { .. },
                ..
            }
        ));
        assert_eq!(ci.run_state_calls(&family, RunId(1)), 0);
    }

    #[test]
    fn test_up_to_date_has_no_appends() {
        assert!(FamilyOutcome::UpToDate.appended().is_empty());
        assert!(!FamilyOutcome::UpToDate.is_failed());
    }

    #[tokio::test]
    async fn test_panic_keeps_rows_appended_before_it() {
        let family = JobFamily::new("e2e-openstack-serial-4.4");
        let sheet = Arc::new(PanicOnAppend {
            inner: MemoryTrackingSheet::new(),
            poisoned: RunId(3),
        });
        let ci = Arc::new(MemoryCiStatus::new());
        for id in 1..=4 {
            ci.add_run(&family, RunId(id), RawRunState::Passed);
        }
        let orchestrator = Orchestrator::new(
            fast_config(&family),
            sheet.clone(),
            ci,
            Arc::new(StaticRootCauseLookup::new()),
        );

        let report = orchestrator.run().await;

        match report.get(&family) {
            Some(FamilyOutcome::Failed {
                appended,
                error: ReconcileError::WorkerPanicked { detail, .. },
            }) => {
                assert_eq!(appended, &vec![RunId(1), RunId(2)]);
                assert!(detail.contains("run 3"), "detail: {detail}");
            }
            other => panic!("expected WorkerPanicked, got {:?}", other),
        }
        assert_eq!(report.total_appended(), 2);
        assert_eq!(sheet.inner.recorded_ids(&family), vec![RunId(1), RunId(2)]);
    }

    #[test]
    fn test_panic_detail_reads_string_payloads() {
        assert_eq!(panic_detail(&"boom"), "boom");
        assert_eq!(panic_detail(&"boom".to_string()), "boom");
        assert_eq!(panic_detail(&7u8), "non-string panic payload");
    }
}
