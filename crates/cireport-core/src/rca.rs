//! Root-cause classification of failed runs.
//!
//! The lookup service enumerates failure signatures lazily; the classifier
//! folds them into a [`RootCauseSummary`] as they arrive. Infra-tagged
//! signatures take precedence over test-level diagnosis when the summary is
//! applied to a run.

use std::sync::Arc;

use cireport_state::{ComputedResult, Run};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controls::{call_with_controls, CallControls};
use crate::error::{CallFailure, LookupError};

/// Result type for root-cause lookups.
pub type LookupResult<T> = std::result::Result<T, LookupError>;

/// A classified failure instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignature {
    pub description: String,
    /// Attributed to CI infrastructure rather than the system under test.
    pub is_infra: bool,
}

impl FailureSignature {
    pub fn infra(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            is_infra: true,
        }
    }

    pub fn test(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            is_infra: false,
        }
    }
}

impl std::fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

/// Injectable root-cause lookup service.
///
/// The returned stream is finite. Enumeration order is stable for a given
/// run, and calling again restarts it from the beginning.
pub trait RootCauseLookup: Send + Sync {
    fn find_failures<'a>(&'a self, run: &'a Run) -> BoxStream<'a, LookupResult<FailureSignature>>;
}

/// Failure descriptions accumulated for one run, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootCauseSummary {
    pub all_failures: Vec<String>,
    pub infra_failures: Vec<String>,
}

impl RootCauseSummary {
    pub fn push(&mut self, signature: FailureSignature) {
        if signature.is_infra {
            self.infra_failures.push(signature.description.clone());
        }
        self.all_failures.push(signature.description);
    }

    pub fn is_empty(&self) -> bool {
        self.all_failures.is_empty()
    }

    /// Attach the summary to `run`.
    ///
    /// Any infra failure masks the rest and turns the result into
    /// `InfraFailure`; otherwise every failure is kept and the raw result
    /// stands.
    pub fn apply(self, mut run: Run) -> Run {
        if !self.infra_failures.is_empty() {
            run.root_cause = self.infra_failures;
            run.result = ComputedResult::InfraFailure;
        } else {
            run.root_cause = self.all_failures;
        }
        run
    }
}

impl FromIterator<FailureSignature> for RootCauseSummary {
    fn from_iter<I: IntoIterator<Item = FailureSignature>>(iter: I) -> Self {
        let mut summary = RootCauseSummary::default();
        for signature in iter {
            summary.push(signature);
        }
        summary
    }
}

/// Classifies failed runs through a [`RootCauseLookup`].
pub struct RootCauseClassifier {
    lookup: Arc<dyn RootCauseLookup>,
    controls: CallControls,
}

impl RootCauseClassifier {
    pub fn new(lookup: Arc<dyn RootCauseLookup>, controls: CallControls) -> Self {
        Self { lookup, controls }
    }

    /// Only failed runs are looked up; passed and pending runs have no
    /// failures to attribute.
    pub fn needs_classification(result: ComputedResult) -> bool {
        result == ComputedResult::Failed
    }

    /// Enumerate and fold the signatures of `run`.
    ///
    /// Each attempt drains the whole enumeration under the call timeout; a
    /// failed attempt is retried by re-invoking the lookup.
    pub async fn classify(&self, run: &Run) -> Result<RootCauseSummary, CallFailure<LookupError>> {
        let lookup = &self.lookup;
        let summary = call_with_controls(&self.controls, "find_failures", move || async move {
            let mut summary = RootCauseSummary::default();
            let mut signatures = lookup.find_failures(run);
            while let Some(signature) = signatures.next().await {
                summary.push(signature?);
            }
            Ok::<_, LookupError>(summary)
        })
        .await?;

        debug!(
            family = %run.family,
            run_id = %run.id,
            failures = summary.all_failures.len(),
            infra = summary.infra_failures.len(),
            "run classified"
        );
        Ok(summary)
    }
}
