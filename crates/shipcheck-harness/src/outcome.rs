//! Matching a terminal status against the expected outcome

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use shipcheck_common::crd::BuildRunPhase;
use shipcheck_common::Error;

use crate::platform::ResourceHandle;
use crate::poller::TerminalStatus;

/// What a scenario expects its BuildRun to do
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ExpectedOutcome {
    /// The run succeeds
    #[default]
    Succeed,
    /// The run fails with a message matching `message_pattern`
    Fail {
        /// Regular expression searched for in the failure message
        #[serde(rename = "messagePattern")]
        message_pattern: String,
    },
}

impl ExpectedOutcome {
    /// Check that a failure pattern is a valid regular expression
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail { message_pattern } => compile(message_pattern).map(|_| ()),
        }
    }
}

impl fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeed => f.write_str("Succeeded"),
            Self::Fail { message_pattern } => {
                write!(f, "Failed with message matching /{message_pattern}/")
            }
        }
    }
}

/// Require the run to have succeeded
pub fn expect_success(handle: &ResourceHandle, status: &TerminalStatus) -> Result<(), Error> {
    if status.phase == BuildRunPhase::Succeeded {
        return Ok(());
    }
    Err(mismatch(handle, &ExpectedOutcome::Succeed, status))
}

/// Require the run to have failed with a message matching `pattern`.
///
/// The pattern is searched for anywhere in the message, not anchored.
pub fn expect_failure(
    handle: &ResourceHandle,
    status: &TerminalStatus,
    pattern: &str,
) -> Result<(), Error> {
    let re = compile(pattern)?;
    if status.phase == BuildRunPhase::Failed && re.is_match(&status.message) {
        return Ok(());
    }
    let expected = ExpectedOutcome::Fail {
        message_pattern: pattern.to_string(),
    };
    Err(mismatch(handle, &expected, status))
}

/// Check a status against either kind of expectation
pub fn check(
    handle: &ResourceHandle,
    status: &TerminalStatus,
    expected: &ExpectedOutcome,
) -> Result<(), Error> {
    match expected {
        ExpectedOutcome::Succeed => expect_success(handle, status),
        ExpectedOutcome::Fail { message_pattern } => {
            expect_failure(handle, status, message_pattern)
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|e| {
        Error::validation_for_field("messagePattern", format!("invalid pattern {pattern:?}: {e}"))
    })
}

fn mismatch(handle: &ResourceHandle, expected: &ExpectedOutcome, status: &TerminalStatus) -> Error {
    Error::OutcomeMismatch {
        resource: handle.to_string(),
        expected: expected.to_string(),
        actual_phase: status.phase.to_string(),
        actual_reason: status.reason.clone(),
        actual_message: status.message.clone(),
    }
}
