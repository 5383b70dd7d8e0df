//! Cancellable polling with a bounded budget
//!
//! Every wait in the harness goes through [`poll_until`]: waiting for a
//! BuildRun to reach a terminal state, waiting for generated service
//! accounts to disappear, and retrying creates while a namespace settles.
//! Sharing one loop keeps timeout and cancellation semantics identical
//! everywhere:
//!
//! - the probe runs immediately, then every `retry_interval`
//! - the last probe runs at the deadline, so `Timeout` is never reported
//!   before `timeout` has elapsed
//! - transient probe errors are remembered and polling continues
//! - permanent probe errors abort immediately
//! - cancellation is checked before each probe and raced against every
//!   probe and sleep, and is reported as `Cancelled`, never as `Timeout`

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Error;

/// How often a long wait logs that it is still in progress
pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Timeout and cadence for one wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollBudget {
    timeout: Duration,
    retry_interval: Duration,
}

impl PollBudget {
    /// Create a budget, enforcing `timeout > retry_interval > 0`
    pub fn new(timeout: Duration, retry_interval: Duration) -> Result<Self, Error> {
        if retry_interval.is_zero() {
            return Err(Error::validation_for_field(
                "retry_interval",
                "retry interval must be greater than zero",
            ));
        }
        if timeout <= retry_interval {
            return Err(Error::validation_for_field(
                "timeout",
                format!(
                    "timeout ({:?}) must be greater than retry interval ({:?})",
                    timeout, retry_interval
                ),
            ));
        }
        Ok(Self {
            timeout,
            retry_interval,
        })
    }

    /// Budget from whole seconds
    pub fn from_secs(timeout: u64, retry_interval: u64) -> Result<Self, Error> {
        Self::new(
            Duration::from_secs(timeout),
            Duration::from_secs(retry_interval),
        )
    }

    /// Maximum time to wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time between probes
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    /// The awaited condition holds; polling stops with this value
    Ready(T),
    /// Not there yet; the string describes what was observed
    Pending(String),
}

/// Poll `probe` until it reports [`Observation::Ready`].
///
/// # Arguments
/// * `resource` - What is being waited on, used in logs and errors
/// * `budget` - Timeout and probe cadence
/// * `cancel` - External cancellation (suite deadline, Ctrl-C)
/// * `probe` - Async check run once per interval
///
/// # Errors
/// * [`Error::Timeout`] with the last observation when the budget runs out
/// * [`Error::Cancelled`] when `cancel` fires first
/// * Any non-transient error returned by `probe`, unchanged
pub async fn poll_until<T, F, Fut>(
    resource: &str,
    budget: &PollBudget,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>, Error>>,
{
    let start = Instant::now();
    let deadline = start + budget.timeout;
    let mut next_progress_log = start + PROGRESS_LOG_INTERVAL;
    let mut last_observed = "nothing observed yet".to_string();
    let mut last_error: Option<String> = None;
    let mut attempt = 0u32;

    let cancelled = |start: Instant| Error::Cancelled {
        resource: resource.to_string(),
        waited: start.elapsed(),
    };

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(start));
        }

        attempt += 1;
        // A probe started right at the deadline still gets one interval.
        let probe_deadline = deadline.max(Instant::now() + budget.retry_interval);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(start)),
            res = tokio::time::timeout_at(probe_deadline, probe()) => res,
        };

        match outcome {
            Ok(Ok(Observation::Ready(value))) => {
                debug!(resource, attempt, elapsed_ms = start.elapsed().as_millis() as u64, "Condition met");
                return Ok(value);
            }
            Ok(Ok(Observation::Pending(state))) => {
                debug!(resource, attempt, state = %state, "Condition not yet met");
                last_observed = state;
                last_error = None;
            }
            Ok(Err(e)) if e.is_transient() => {
                debug!(resource, attempt, error = %e, "Transient error while polling, retrying");
                last_error = Some(e.to_string());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(resource, attempt, "Probe did not complete in time");
                last_error = Some("probe did not complete in time".to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                resource: resource.to_string(),
                waited: now - start,
                last_observed,
                last_error,
            });
        }

        if now >= next_progress_log {
            info!(
                resource,
                elapsed_secs = (now - start).as_secs(),
                state = %last_observed,
                "Still waiting"
            );
            next_progress_log = now + PROGRESS_LOG_INTERVAL;
        }

        let wake = (now + budget.retry_interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(start)),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}
