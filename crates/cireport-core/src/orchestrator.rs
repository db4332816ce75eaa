//! Fan-out of one reconciliation worker per job family.
//!
//! Families share no mutable state: each worker only appends to its own
//! family's rows. The orchestrator spawns every worker, then waits on all of
//! them before reporting. A fault or panic in one family never cancels its
//! siblings.

use std::sync::Arc;

use cireport_state::{JobFamily, TrackingSheet};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn, Instrument};

use crate::ci::{CiStatusSource, RunResultFetcher};
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::range::RangeResolver;
use crate::rca::{RootCauseClassifier, RootCauseLookup};
use crate::telemetry::family_span;
use crate::worker::{FamilyOutcome, ReconcileWorker};

/// Outcome of one family within a pipeline run.
#[derive(Debug)]
pub struct FamilyReport {
    pub family: JobFamily,
    pub outcome: FamilyOutcome,
}

/// Result of a complete pipeline run, one entry per dispatched family in
/// configuration order.
#[derive(Debug)]
pub struct PipelineReport {
    pub families: Vec<FamilyReport>,
}

/// Compact per-family counts for logs and status output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelineSummary {
    pub families: usize,
    pub up_to_date: usize,
    pub deferred: usize,
    pub failed: usize,
    pub appended: usize,
}

impl PipelineReport {
    /// Reports of families whose pass ended in a fatal fault.
    pub fn failed(&self) -> Vec<&FamilyReport> {
        self.families
            .iter()
            .filter(|r| r.outcome.is_failed())
            .collect()
    }

    /// Whether no family ended in a fatal fault.
    pub fn all_succeeded(&self) -> bool {
        self.failed().is_empty()
    }

    /// Rows appended across every family.
    pub fn total_appended(&self) -> usize {
        self.families
            .iter()
            .map(|r| r.outcome.appended().len())
            .sum()
    }

    pub fn get(&self, family: &JobFamily) -> Option<&FamilyOutcome> {
        self.families
            .iter()
            .find(|r| &r.family == family)
            .map(|r| &r.outcome)
    }

    pub fn summary(&self) -> PipelineSummary {
        let count = |pred: fn(&FamilyOutcome) -> bool| {
            self.families.iter().filter(|r| pred(&r.outcome)).count()
        };
        PipelineSummary {
            families: self.families.len(),
            up_to_date: count(|o| matches!(o, FamilyOutcome::UpToDate)),
            deferred: count(|o| matches!(o, FamilyOutcome::Deferred { .. })),
            failed: count(FamilyOutcome::is_failed),
            appended: self.total_appended(),
        }
    }
}

/// Dispatches reconciliation workers and joins them.
pub struct Orchestrator {
    config: Arc<ReconcileConfig>,
    sheet: Arc<dyn TrackingSheet>,
    ci: Arc<dyn CiStatusSource>,
    lookup: Arc<dyn RootCauseLookup>,
}

impl Orchestrator {
    pub fn new(
        config: ReconcileConfig,
        sheet: Arc<dyn TrackingSheet>,
        ci: Arc<dyn CiStatusSource>,
        lookup: Arc<dyn RootCauseLookup>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sheet,
            ci,
            lookup,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Build the worker for one family.
    pub fn worker(&self, family: JobFamily) -> ReconcileWorker {
        let controls = self.config.call_controls;
        ReconcileWorker::new(
            family,
            Arc::clone(&self.config),
            Arc::clone(&self.sheet),
            RangeResolver::new(Arc::clone(&self.sheet), Arc::clone(&self.ci), controls),
            RunResultFetcher::new(Arc::clone(&self.ci), controls),
            RootCauseClassifier::new(Arc::clone(&self.lookup), controls),
        )
    }

    /// Reconcile every configured family concurrently and wait for all of them.
    pub async fn run(&self) -> PipelineReport {
        let families = self.config.families();
        info!(
            event = "pipeline.started",
            families = families.len(),
            operator = %self.config.operator
        );

        let handles: Vec<_> = families
            .iter()
            .map(|family| {
                tokio::spawn(self.worker(family.clone()).run().instrument(family_span(family)))
            })
            .collect();

        let joined = join_all(handles).await;

        let families = families
            .into_iter()
            .zip(joined)
            .map(|(family, joined)| {
                // Panics while recording are caught by the worker itself, so
                // a task that dies here had not appended anything yet.
                let outcome = joined.unwrap_or_else(|e| {
                    warn!(event = "family.panicked", family = %family, error = %e);
                    FamilyOutcome::Failed {
                        appended: Vec::new(),
                        error: ReconcileError::WorkerPanicked {
                            family: family.clone(),
                            detail: e.to_string(),
                        },
                    }
                });
                FamilyReport { family, outcome }
            })
            .collect();

        let report = PipelineReport { families };
        let summary = report.summary();
        info!(
            event = "pipeline.finished",
            families = summary.families,
            appended = summary.appended,
            up_to_date = summary.up_to_date,
            deferred = summary.deferred,
            failed = summary.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::RawRunState;
    use crate::fakes::{MemoryCiStatus, StaticRootCauseLookup};
    use cireport_state::fakes::MemoryTrackingSheet;
    use cireport_state::RunId;

    fn report_of(outcomes: Vec<(&str, FamilyOutcome)>) -> PipelineReport {
        PipelineReport {
            families: outcomes
                .into_iter()
                .map(|(name, outcome)| FamilyReport {
                    family: JobFamily::new(name),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = report_of(vec![
            ("a", FamilyOutcome::UpToDate),
            (
                "b",
                FamilyOutcome::Done {
                    appended: vec![RunId(1), RunId(2)],
                },
            ),
            (
                "c",
                FamilyOutcome::Failed {
                    appended: vec![RunId(7)],
                    error: ReconcileError::WorkerPanicked {
                        family: JobFamily::new("c"),
                        detail: "boom".to_string(),
                    },
                },
            ),
        ]);

        assert_eq!(report.total_appended(), 3);
        assert!(!report.all_succeeded());
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].family.as_str(), "c");
        assert_eq!(
            report.summary(),
            PipelineSummary {
                families: 3,
                up_to_date: 1,
                deferred: 0,
                failed: 1,
                appended: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_single_family_selection_dispatches_one_worker() {
        let only = JobFamily::new("only");
        let other = JobFamily::new("other");
        let sheet = Arc::new(MemoryTrackingSheet::new());
        let ci = Arc::new(
            MemoryCiStatus::new()
                .with_run(&only, RunId(1), RawRunState::Passed)
                .with_run(&other, RunId(1), RawRunState::Passed),
        );
        let config = ReconcileConfig::default()
            .with_known_families(vec![only.clone(), other.clone()])
            .with_family(only.clone());

        let orchestrator =
            Orchestrator::new(config, sheet.clone(), ci, Arc::new(StaticRootCauseLookup::new()));
        let report = orchestrator.run().await;

        assert_eq!(report.families.len(), 1);
        assert_eq!(sheet.recorded_ids(&only), vec![RunId(1)]);
        assert!(sheet.recorded_ids(&other).is_empty());
    }
}
