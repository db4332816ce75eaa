//! Range resolution: which run ids of a family are not yet recorded.

use std::sync::Arc;

use cireport_state::{JobFamily, RunId, TrackingSheet};
use tracing::{debug, warn};

use crate::ci::CiStatusSource;
use crate::config::RunSelection;
use crate::controls::{call_with_controls, CallControls};
use crate::error::{ReconcileError, ReconcileResult};

/// Inclusive span of run ids to reconcile, possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRange {
    /// Already up to date.
    Empty,
    /// `lower..=upper`; a single run when `lower == upper`.
    Span { lower: RunId, upper: RunId },
}

impl RunRange {
    /// Range between the recorded watermark and the latest known run.
    ///
    /// A family with no rows has an implicit watermark of 0. A watermark at
    /// `u64::MAX` leaves nothing to record.
    pub fn between(watermark: Option<RunId>, latest_known: RunId) -> Self {
        match watermark.unwrap_or_default().next() {
            Some(lower) if lower <= latest_known => RunRange::Span {
                lower,
                upper: latest_known,
            },
            _ => RunRange::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RunRange::Empty)
    }

    pub fn len(&self) -> u64 {
        match self {
            RunRange::Empty => 0,
            RunRange::Span { lower, upper } => upper.0 - lower.0 + 1,
        }
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = RunId> {
        let bounds = match *self {
            RunRange::Empty => None,
            RunRange::Span { lower, upper } => Some(lower.0..=upper.0),
        };
        bounds.into_iter().flatten().map(RunId)
    }
}

impl std::fmt::Display for RunRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunRange::Empty => write!(f, "none"),
            RunRange::Span { lower, upper } if lower == upper => write!(f, "{upper}"),
            RunRange::Span { lower, upper } => write!(f, "{lower}-{upper}"),
        }
    }
}

/// Computes the runs of a family that still need a row.
///
/// Read-only: consults the sheet watermark and the CI system's latest id.
pub struct RangeResolver {
    sheet: Arc<dyn TrackingSheet>,
    ci: Arc<dyn CiStatusSource>,
    controls: CallControls,
}

impl RangeResolver {
    pub fn new(
        sheet: Arc<dyn TrackingSheet>,
        ci: Arc<dyn CiStatusSource>,
        controls: CallControls,
    ) -> Self {
        Self { sheet, ci, controls }
    }

    /// Highest run id already recorded for `family`.
    pub async fn watermark(&self, family: &JobFamily) -> ReconcileResult<Option<RunId>> {
        let sheet = &self.sheet;
        call_with_controls(&self.controls, "latest_recorded_id", move || {
            sheet.latest_recorded_id(family)
        })
        .await
        .map_err(|source| ReconcileError::Watermark {
            family: family.clone(),
            source,
        })
    }

    /// Runs between the watermark (exclusive) and the latest known id (inclusive).
    pub async fn resolve(&self, family: &JobFamily) -> ReconcileResult<RunRange> {
        let watermark = self.watermark(family).await?;

        let ci = &self.ci;
        let latest = call_with_controls(&self.controls, "latest_known_id", move || {
            ci.latest_known_id(family)
        })
        .await
        .map_err(|source| ReconcileError::LatestKnown {
            family: family.clone(),
            source,
        })?;

        let range = RunRange::between(watermark, latest);
        debug!(
            family = %family,
            watermark = ?watermark.map(|w| w.0),
            latest = %latest,
            range = %range,
            "range resolved"
        );
        Ok(range)
    }

    /// Explicitly selected runs, minus any already recorded.
    ///
    /// Shares the implicit floor of [`RunRange::between`]: id 0 is never
    /// selectable.
    pub async fn resolve_selection(
        &self,
        family: &JobFamily,
        selection: &RunSelection,
    ) -> ReconcileResult<Vec<RunId>> {
        let watermark = self.watermark(family).await?;
        let (recorded, pending): (Vec<RunId>, Vec<RunId>) = selection
            .ids()
            .iter()
            .copied()
            .partition(|id| *id <= watermark.unwrap_or_default());

        if !recorded.is_empty() {
            warn!(
                family = %family,
                skipped = recorded.len(),
                watermark = ?watermark.map(|w| w.0),
                "selected runs at or below watermark, skipping"
            );
        }
        Ok(pending)
    }
}
