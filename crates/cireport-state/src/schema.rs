//! Records written to the tracking sheet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named class of CI job tracked independently (its own watermark and rows).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFamily(String);

impl JobFamily {
    pub fn new(name: impl Into<String>) -> Self {
        JobFamily(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build number of a run, scoped to its job family.
///
/// Higher ids are later runs; ordering is the only property the pipeline
/// relies on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl RunId {
    /// The id immediately after this one, `None` past `u64::MAX`.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(RunId)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final outcome recorded for a run.
///
/// Serialized and displayed with the labels used in the sheet's result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputedResult {
    #[serde(rename = "SUCCESS")]
    Passed,
    #[serde(rename = "FAILURE")]
    Failed,
    /// At least one failure was attributed to CI infrastructure.
    #[serde(rename = "INFRA FAILURE")]
    InfraFailure,
    #[serde(rename = "Pending")]
    Pending,
}

impl ComputedResult {
    pub fn label(&self) -> &'static str {
        match self {
            ComputedResult::Passed => "SUCCESS",
            ComputedResult::Failed => "FAILURE",
            ComputedResult::InfraFailure => "INFRA FAILURE",
            ComputedResult::Pending => "Pending",
        }
    }
}

impl std::fmt::Display for ComputedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One executed instance of a job family, as reconciled in a single pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub family: JobFamily,
    pub id: RunId,
    pub result: ComputedResult,
    /// Ordered failure descriptions attributed to the run.
    pub root_cause: Vec<String>,
}

impl Run {
    /// A run with no root cause attached yet.
    pub fn new(family: JobFamily, id: RunId, result: ComputedResult) -> Self {
        Self {
            family,
            id,
            result,
            root_cause: Vec::new(),
        }
    }
}

/// A row appended to the sheet: the run plus who recorded it and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    pub run: Run,
    /// Operator identity the row is attributed to.
    pub operator: String,
    pub recorded_at: DateTime<Utc>,
}

impl SheetRow {
    /// Build a row stamped with the current time.
    pub fn new(run: Run, operator: impl Into<String>) -> Self {
        Self {
            run,
            operator: operator.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn family(&self) -> &JobFamily {
        &self.run.family
    }

    pub fn run_id(&self) -> RunId {
        self.run.id
    }
}
