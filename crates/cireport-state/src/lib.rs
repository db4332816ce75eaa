//! CIReport-State: Tracking-Sheet Layer for CI Report
//!
//! This crate owns the data model shared by every reconciliation pass and
//! the abstract sheet backend the pipeline appends to.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: a monotonically advancing, append-only record of CI runs per job
//! family.
//!
//! ## Key Components
//!
//! - `TrackingSheet`: read the watermark of a family, append a row
//! - `Run` / `SheetRow`: the record written once per CI run
//! - `fakes::MemoryTrackingSheet`: in-memory backend for tests

mod error;
pub mod fakes;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use schema::{ComputedResult, JobFamily, Run, RunId, SheetRow};
pub use storage_traits::{StorageResult, TrackingSheet};
