//! Reconciliation configuration.
//!
//! A [`ReconcileConfig`] is built once, before any family is dispatched, and
//! shared read-only by every worker. Nothing in the pipeline consults process
//! state after construction.

use std::str::FromStr;

use cireport_state::{JobFamily, RunId};
use serde::{Deserialize, Serialize};

use crate::controls::CallControls;
use crate::error::ConfigError;

/// Environment variable naming the operator rows are attributed to.
pub const OPERATOR_ENV: &str = "CIREPORT_USER";

/// Operator used when neither the environment nor the local account names one.
pub const FALLBACK_OPERATOR: &str = "cireport";

/// Job families tracked when no single family is selected.
pub const DEFAULT_FAMILIES: &[&str] = &[
    "release-openshift-ocp-installer-e2e-openstack-4.4",
    "release-openshift-ocp-installer-e2e-openstack-serial-4.4",
    "release-openshift-ocp-installer-e2e-openstack-4.3",
    "release-openshift-ocp-installer-e2e-openstack-serial-4.3",
    "release-openshift-ocp-installer-e2e-openstack-4.2",
    "release-openshift-ocp-installer-e2e-openstack-serial-4.2",
];

/// Upper bound on the number of ids an explicit selection may expand to.
pub const MAX_SELECTION_LEN: usize = 10_000;

/// What to do with a run whose state could not be retrieved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchFaultPolicy {
    /// Stop the family's pass before the run; a later pass resumes there.
    #[default]
    Halt,
    /// Record the run as `Pending` and carry on.
    RecordPending,
}

/// Explicit run ids that bypass range resolution.
///
/// Parsed from comma-separated ids and inclusive ranges, e.g. `"3,10-12"`.
/// Always sorted ascending without duplicates, and never longer than
/// [`MAX_SELECTION_LEN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSelection(Vec<RunId>);

impl RunSelection {
    pub fn ids(&self) -> &[RunId] {
        &self.0
    }
}

impl FromStr for RunSelection {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidRunSelection {
            input: input.to_string(),
            reason,
        };
        let parse_id = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map(RunId)
                .map_err(|_| invalid(format!("'{}' is not a run id", s.trim())))
        };

        let mut ids = Vec::new();
        for item in input.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(invalid("empty item".to_string()));
            }
            match item.split_once('-') {
                Some((lo, hi)) => {
                    let (lo, hi) = (parse_id(lo)?, parse_id(hi)?);
                    if lo > hi {
                        return Err(invalid(format!("range {lo}-{hi} is descending")));
                    }
                    let room = (MAX_SELECTION_LEN - ids.len()) as u64;
                    if hi.0 - lo.0 >= room {
                        return Err(invalid(format!(
                            "range {lo}-{hi} exceeds {MAX_SELECTION_LEN} runs"
                        )));
                    }
                    ids.extend((lo.0..=hi.0).map(RunId));
                }
                None => ids.push(parse_id(item)?),
            }
            if ids.len() > MAX_SELECTION_LEN {
                return Err(invalid(format!("more than {MAX_SELECTION_LEN} runs")));
            }
        }

        ids.sort_unstable();
        ids.dedup();
        Ok(RunSelection(ids))
    }
}

/// Resolution of the identity sheet rows are attributed to.
pub struct OperatorIdentity;

impl OperatorIdentity {
    /// `CIREPORT_USER`, else the local account name, else `"cireport"`.
    pub fn resolve() -> String {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Same as [`OperatorIdentity::resolve`] over an arbitrary variable source.
    pub fn resolve_with(var: impl Fn(&str) -> Option<String>) -> String {
        [OPERATOR_ENV, "USER", "USERNAME"]
            .into_iter()
            .filter_map(|key| var(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| FALLBACK_OPERATOR.to_string())
    }
}

/// Immutable configuration for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Families reconciled when `job` is unset.
    pub known_families: Vec<JobFamily>,
    /// Reconcile only this family.
    pub job: Option<JobFamily>,
    /// Explicit ids overriding range resolution.
    pub selection: Option<RunSelection>,
    /// Identity attributed on every appended row.
    pub operator: String,
    pub call_controls: CallControls,
    pub fetch_fault_policy: FetchFaultPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            known_families: DEFAULT_FAMILIES.iter().copied().map(JobFamily::new).collect(),
            job: None,
            selection: None,
            operator: FALLBACK_OPERATOR.to_string(),
            call_controls: CallControls::default(),
            fetch_fault_policy: FetchFaultPolicy::default(),
        }
    }
}

impl ReconcileConfig {
    /// Default configuration with the operator resolved from the environment.
    pub fn from_env() -> Self {
        Self::default().with_operator(OperatorIdentity::resolve())
    }

    pub fn with_family(mut self, family: JobFamily) -> Self {
        self.job = Some(family);
        self
    }

    pub fn with_known_families(mut self, families: Vec<JobFamily>) -> Self {
        self.known_families = families;
        self
    }

    pub fn with_selection(mut self, selection: RunSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn with_call_controls(mut self, controls: CallControls) -> Self {
        self.call_controls = controls;
        self
    }

    pub fn with_fetch_fault_policy(mut self, policy: FetchFaultPolicy) -> Self {
        self.fetch_fault_policy = policy;
        self
    }

    /// Families a pipeline run dispatches workers for.
    pub fn families(&self) -> Vec<JobFamily> {
        match &self.job {
            Some(family) => vec![family.clone()],
            None => self.known_families.clone(),
        }
    }
}
