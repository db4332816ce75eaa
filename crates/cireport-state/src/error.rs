//! Error types for cireport-state

use thiserror::Error;

use crate::schema::{JobFamily, RunId};

/// Errors surfaced by a tracking-sheet backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not be reached or answered with a fault
    #[error("sheet backend unavailable: {0}")]
    Unavailable(String),

    /// Backend refused to store the row
    #[error("append rejected for {family} run {run_id}: {reason}")]
    AppendRejected {
        family: JobFamily,
        run_id: RunId,
        reason: String,
    },

    /// Row would not advance the family's watermark
    #[error("append of {family} run {run_id} is not above watermark {watermark}")]
    OutOfOrderAppend {
        family: JobFamily,
        run_id: RunId,
        watermark: RunId,
    },
}
