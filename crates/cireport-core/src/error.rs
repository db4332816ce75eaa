//! Error types for the reconciliation pipeline.

use cireport_state::{JobFamily, RunId, StorageError};
use thiserror::Error;

/// Errors returned by a CI system's job-status API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CiError {
    /// API unreachable or answered with a fault.
    #[error("CI system unavailable: {0}")]
    Unavailable(String),

    /// The CI system has no job by this name.
    #[error("unknown job family: {family}")]
    UnknownFamily { family: JobFamily },

    /// The run has not materialised yet (no artifacts, no status).
    #[error("run {run_id} of {family} not found")]
    RunNotFound { family: JobFamily, run_id: RunId },
}

/// Errors returned by the root-cause lookup service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("root-cause lookup unavailable: {0}")]
    Unavailable(String),

    #[error("malformed failure data: {0}")]
    Malformed(String),
}

/// Structural configuration faults, detected before any family is dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid run selection '{input}': {reason}")]
    InvalidRunSelection { input: String, reason: String },
}

/// Outcome of an external call run under [`crate::controls::CallControls`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallFailure<E: std::error::Error + 'static> {
    /// Every attempt failed; carries the last error.
    #[error("{source} (after {attempts} attempt(s))")]
    Failed {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The last attempt exceeded the per-call timeout.
    #[error("timed out after {limit_ms}ms (after {attempts} attempt(s))")]
    TimedOut { attempts: u32, limit_ms: u64 },
}

/// Faults that end one family's reconciliation pass.
///
/// None of these cancel sibling families.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the recorded watermark failed.
    #[error("failed to read watermark of {family}: {source}")]
    Watermark {
        family: JobFamily,
        #[source]
        source: CallFailure<StorageError>,
    },

    /// Reading the latest known CI run failed.
    #[error("failed to read latest CI run of {family}: {source}")]
    LatestKnown {
        family: JobFamily,
        #[source]
        source: CallFailure<CiError>,
    },

    /// Root-cause classification failed.
    #[error("root-cause lookup failed for {family} run {run_id}: {source}")]
    Classify {
        family: JobFamily,
        run_id: RunId,
        #[source]
        source: CallFailure<LookupError>,
    },

    /// The sheet refused or failed a write.
    #[error("append failed for {family} run {run_id}: {source}")]
    Append {
        family: JobFamily,
        run_id: RunId,
        #[source]
        source: CallFailure<StorageError>,
    },

    /// The worker task died before reporting.
    #[error("worker for {family} panicked: {detail}")]
    WorkerPanicked { family: JobFamily, detail: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience result alias.
pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;
