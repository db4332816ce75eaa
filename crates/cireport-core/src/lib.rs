//! CI Report Core
//!
//! Reconciles CI job runs against a tracking sheet. For every configured job
//! family, concurrently:
//!
//! 1. resolve the run ids recorded in CI but not yet on the sheet,
//! 2. fetch each run's state,
//! 3. classify failed runs as infrastructure- or test-caused,
//! 4. append one row per run, in ascending id order.
//!
//! The sheet backend, the CI job-status API and the root-cause lookup service
//! are injected as [`TrackingSheet`], [`CiStatusSource`] and
//! [`RootCauseLookup`] implementations.

pub mod ci;
pub mod config;
pub mod controls;
pub mod error;
pub mod fakes;
pub mod orchestrator;
pub mod range;
pub mod rca;
pub mod telemetry;
pub mod worker;

pub use ci::{CiResult, CiStatusSource, FetchOutcome, RawRunState, RunResultFetcher};
pub use config::{
    FetchFaultPolicy, OperatorIdentity, ReconcileConfig, RunSelection, DEFAULT_FAMILIES,
    MAX_SELECTION_LEN,
};
pub use controls::{call_with_controls, CallControls};
pub use error::{CallFailure, CiError, ConfigError, LookupError, ReconcileError, ReconcileResult};
pub use orchestrator::{FamilyReport, Orchestrator, PipelineReport, PipelineSummary};
pub use range::{RangeResolver, RunRange};
pub use rca::{
    FailureSignature, LookupResult, RootCauseClassifier, RootCauseLookup, RootCauseSummary,
};
pub use telemetry::{default_directives, family_span, init_tracing, LogFormat};
pub use worker::{FamilyOutcome, ReconcileWorker};

pub use cireport_state::{
    ComputedResult, JobFamily, Run, RunId, SheetRow, StorageError, TrackingSheet,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
