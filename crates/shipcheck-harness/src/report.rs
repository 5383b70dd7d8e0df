//! Scenario and suite reports

use std::fmt;
use std::time::Duration;

use tracing::{error, info};

use shipcheck_common::Error;

use crate::diagnostics::DiagnosticsBundle;
use crate::outcome::ExpectedOutcome;
use crate::poller::TerminalStatus;
use crate::scenario::ScenarioState;

/// Errors longer than this are cut short in the log summary
const SUMMARY_ERROR_LEN: usize = 200;

/// How a scenario ended
#[derive(Debug)]
pub enum Verdict {
    /// The expectation was met
    Passed,
    /// The expectation was not met, or a step errored
    Failed {
        /// What went wrong
        error: Error,
        /// What was collected afterwards, absent for run-aborting errors
        diagnostics: Option<Box<DiagnosticsBundle>>,
    },
    /// The scenario was not run
    Skipped {
        /// Why it was not run
        reason: String,
    },
}

impl Verdict {
    /// Tag used in report lines
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed { .. } => "FAIL",
            Self::Skipped { .. } => "SKIP",
        }
    }
}

/// Result of one scenario
#[derive(Debug)]
pub struct ScenarioReport {
    /// Scenario label
    pub label: String,
    /// Identifier the scenario ran under, absent when skipped
    pub identifier: Option<String>,
    /// What the scenario expected
    pub expected: ExpectedOutcome,
    /// Terminal status observed, if the run got that far
    pub actual: Option<TerminalStatus>,
    /// Last state reached
    pub state: ScenarioState,
    /// How it ended
    pub verdict: Verdict,
    /// Wall time spent
    pub duration: Duration,
}

impl ScenarioReport {
    /// Report for a scenario that was not run
    pub fn skipped(label: &str, expected: ExpectedOutcome, reason: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            identifier: None,
            expected,
            actual: None,
            state: ScenarioState::NotSubmitted,
            verdict: Verdict::Skipped {
                reason: reason.into(),
            },
            duration: Duration::ZERO,
        }
    }

    /// Report for a scenario the run was cancelled before it could start.
    ///
    /// Counts as a failure: an interrupted run never passes.
    pub fn cancelled(label: &str, expected: ExpectedOutcome) -> Self {
        Self {
            label: label.to_string(),
            identifier: None,
            expected,
            actual: None,
            state: ScenarioState::Cancelled,
            verdict: Verdict::Failed {
                error: Error::Cancelled {
                    resource: format!("scenario {label}"),
                    waited: Duration::ZERO,
                },
                diagnostics: None,
            },
            duration: Duration::ZERO,
        }
    }

    /// Whether the scenario passed
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Passed)
    }

    /// Whether the scenario failed
    pub fn failed(&self) -> bool {
        matches!(self.verdict, Verdict::Failed { .. })
    }

    /// Whether the scenario was skipped
    pub fn skipped_reason(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    /// The error that failed this scenario, if it must abort the run
    pub fn fatal_error(&self) -> Option<&Error> {
        match &self.verdict {
            Verdict::Failed { error, .. } if error.is_fatal() => Some(error),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.label)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}  {} ({:.1}s)",
            self.verdict.tag(),
            self.name(),
            self.duration.as_secs_f64()
        )?;
        match &self.verdict {
            Verdict::Passed => Ok(()),
            Verdict::Skipped { reason } => writeln!(f, "      skipped: {reason}"),
            Verdict::Failed { error, diagnostics } => {
                writeln!(f, "      kind:     {}", error.kind_name())?;
                writeln!(f, "      state:    {}", self.state)?;
                writeln!(f, "      expected: {}", self.expected)?;
                match &self.actual {
                    Some(actual) => writeln!(f, "      actual:   {actual}")?,
                    None => writeln!(f, "      actual:   no terminal status observed")?,
                }
                writeln!(f, "      error:    {error}")?;
                if let Some(diagnostics) = diagnostics {
                    write!(f, "{diagnostics}")?;
                }
                Ok(())
            }
        }
    }
}

/// Results of a whole run
#[derive(Debug)]
pub struct SuiteReport {
    /// Per-scenario results in catalog order
    pub scenarios: Vec<ScenarioReport>,
    /// Wall time of the whole run
    pub duration: Duration,
    /// Why the run was aborted, if it was
    pub aborted: Option<String>,
}

impl SuiteReport {
    /// Number of passed scenarios
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    /// Number of failed scenarios
    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.failed()).count()
    }

    /// Number of skipped scenarios
    pub fn skipped(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.skipped_reason().is_some())
            .count()
    }

    /// Whether every scenario that ran passed and nothing aborted the run
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.aborted.is_none()
    }

    /// Log a one-line-per-scenario summary
    pub fn log_summary(&self) {
        info!("========================================");
        info!("  SHIPCHECK");
        info!("========================================");
        for s in &self.scenarios {
            info!(
                "  {}  {:48} {:.1}s",
                s.verdict.tag(),
                s.name(),
                s.duration.as_secs_f64()
            );
            match &s.verdict {
                Verdict::Failed { error, .. } => {
                    let msg = error.to_string();
                    let truncated = match msg.char_indices().nth(SUMMARY_ERROR_LEN) {
                        Some((idx, _)) => &msg[..idx],
                        None => &msg,
                    };
                    info!("        -> {truncated}");
                }
                Verdict::Skipped { reason } => info!("        -> {reason}"),
                Verdict::Passed => {}
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed, {} skipped ({:.1}s total)",
            self.passed(),
            self.failed(),
            self.skipped(),
            self.duration.as_secs_f64()
        );
        if let Some(reason) = &self.aborted {
            error!("  run aborted: {reason}");
        }
        info!("========================================");
    }

    /// `Err` naming the failed scenarios unless the run was a success
    pub fn finish(&self) -> Result<(), String> {
        if self.is_success() {
            return Ok(());
        }
        let failures: Vec<_> = self
            .scenarios
            .iter()
            .filter(|s| s.failed())
            .map(|s| s.name())
            .collect();
        let mut msg = format!(
            "{} of {} scenario(s) failed: {}",
            failures.len(),
            self.scenarios.len(),
            failures.join(", ")
        );
        if let Some(reason) = &self.aborted {
            msg.push_str(&format!(" (run aborted: {reason})"));
        }
        Err(msg)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for scenario in &self.scenarios {
            write!(f, "{scenario}")?;
        }
        writeln!(
            f,
            "{} passed, {} failed, {} skipped in {:.1}s",
            self.passed(),
            self.failed(),
            self.skipped(),
            self.duration.as_secs_f64()
        )?;
        if let Some(reason) = &self.aborted {
            writeln!(f, "run aborted: {reason}")?;
        }
        Ok(())
    }
}
