//! Waiting for a BuildRun to finish

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::info;

use shipcheck_common::crd::{BuildRun, BuildRunPhase};
use shipcheck_common::{poll_until, Error, Observation, PollBudget};

use crate::platform::{BuildPlatform, ResourceHandle, ResourceKind};

/// Terminal state of a BuildRun
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalStatus {
    /// Succeeded or Failed
    pub phase: BuildRunPhase,
    /// Reason from the `Succeeded` condition
    pub reason: String,
    /// Message from the `Succeeded` condition
    pub message: String,
}

impl TerminalStatus {
    /// Terminal status of a run, `None` while it is still pending or running
    pub fn of(run: &BuildRun) -> Option<Self> {
        let phase = run.phase();
        if !phase.is_terminal() {
            return None;
        }
        let condition = run.status.as_ref().and_then(|s| s.succeeded_condition());
        Some(Self {
            phase,
            reason: condition.map(|c| c.reason.clone()).unwrap_or_default(),
            message: condition.map(|c| c.message.clone()).unwrap_or_default(),
        })
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (reason: {}", self.phase, self.reason)?;
        if !self.message.is_empty() {
            write!(f, ", message: {}", self.message)?;
        }
        f.write_str(")")
    }
}

/// A BuildRun observed in a terminal state
#[derive(Clone, Debug)]
pub struct CompletedRun {
    /// The terminal status
    pub status: TerminalStatus,
    /// The BuildRun as last read
    pub build_run: BuildRun,
}

/// Poll a BuildRun until it succeeds or fails.
///
/// A run that has not been created yet, or has no status, keeps the wait
/// going. Returns [`Error::Timeout`] or [`Error::Cancelled`] when the wait
/// ends without a terminal state.
pub async fn await_terminal(
    platform: &dyn BuildPlatform,
    handle: &ResourceHandle,
    budget: &PollBudget,
    cancel: &CancellationToken,
) -> Result<CompletedRun, Error> {
    if handle.kind != ResourceKind::BuildRun {
        return Err(Error::validation(format!(
            "can only await BuildRuns, got {handle}"
        )));
    }

    let completed = poll_until(&handle.to_string(), budget, cancel, || async move {
        let Some(run) = platform
            .get_build_run(&handle.namespace, &handle.name)
            .await?
        else {
            return Ok(Observation::Pending("not found".to_string()));
        };
        Ok(match TerminalStatus::of(&run) {
            Some(status) => Observation::Ready(CompletedRun {
                status,
                build_run: run,
            }),
            None => Observation::Pending(describe_progress(&run)),
        })
    })
    .await?;

    info!(resource = %handle, status = %completed.status, "BuildRun finished");
    Ok(completed)
}

fn describe_progress(run: &BuildRun) -> String {
    let phase = run.phase();
    match run.status.as_ref().and_then(|s| s.succeeded_condition()) {
        Some(c) if !c.message.is_empty() => {
            format!("{phase} (reason: {}, message: {})", c.reason, c.message)
        }
        Some(c) => format!("{phase} (reason: {})", c.reason),
        None => format!("{phase} (no status yet)"),
    }
}
