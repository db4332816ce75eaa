//! Storage trait definitions for CI Report
//!
//! `TrackingSheet` is the only persistence the pipeline needs: a per-family
//! watermark read and an append. Backends are external; an in-memory fake is
//! provided for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{JobFamily, RunId, SheetRow};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Append-only tracking sheet, one row set per job family.
///
/// Guarantees:
/// - The watermark of a family is the highest `RunId` appended for it.
/// - Appends are never rolled back; there is no transactional grouping.
/// - Rows of different families are independent.
#[async_trait]
pub trait TrackingSheet: Send + Sync {
    /// Highest run id already recorded for `family`, or `None` if it has no rows.
    async fn latest_recorded_id(&self, family: &JobFamily) -> StorageResult<Option<RunId>>;

    /// Append one row, implicitly advancing the family's watermark.
    async fn append_row(&self, row: SheetRow) -> StorageResult<()>;

    /// All rows recorded for `family`, in append order.
    async fn rows(&self, family: &JobFamily) -> StorageResult<Vec<SheetRow>>;
}
