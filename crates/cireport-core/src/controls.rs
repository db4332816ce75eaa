//! Call controls for external collaborators: per-attempt timeout and retry
//! with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CallFailure;

/// Timeout and retry budget applied to calls into the CI system, the
/// root-cause lookup service and the sheet backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallControls {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of retries (0 = no retries, call once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for CallControls {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl CallControls {
    /// Same timeout, single attempt.
    pub fn without_retries(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Run `call` under `controls`, retrying failed or timed-out attempts.
///
/// `call` is invoked afresh for every attempt. The last failure is returned
/// once the budget is spent.
pub async fn call_with_controls<T, E, F, Fut>(
    controls: &CallControls,
    operation: &str,
    mut call: F,
) -> Result<T, CallFailure<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = controls.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        let failure = match tokio::time::timeout(controls.timeout(), call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(source)) => CallFailure::Failed {
                attempts: attempt,
                source,
            },
            Err(_elapsed) => CallFailure::TimedOut {
                attempts: attempt,
                limit_ms: controls.timeout_ms,
            },
        };

        if attempt >= max_attempts {
            return Err(failure);
        }

        let delay = controls.backoff(attempt);
        warn!(
            operation = %operation,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "external call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
