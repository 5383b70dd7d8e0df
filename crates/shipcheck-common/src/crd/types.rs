//! Shared status types for build resources

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type the build controller uses to report BuildRun progress
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Reason reported while a BuildRun is waiting to be scheduled
pub const REASON_PENDING: &str = "Pending";

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition as written by the build controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (the controller only writes `Succeeded`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Lifecycle phase of a BuildRun, derived from its `Succeeded` condition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BuildRunPhase {
    /// No controller status yet, or waiting to be scheduled
    #[default]
    Pending,
    /// The execution engine is running build steps
    Running,
    /// All build steps completed
    Succeeded,
    /// The build failed, timed out or was cancelled
    Failed,
}

impl BuildRunPhase {
    /// Derive the phase from a `Succeeded` condition, if one exists
    pub fn from_condition(condition: Option<&Condition>) -> Self {
        match condition {
            None => Self::Pending,
            Some(c) => match c.status {
                ConditionStatus::True => Self::Succeeded,
                ConditionStatus::False => Self::Failed,
                ConditionStatus::Unknown if c.reason == REASON_PENDING => Self::Pending,
                ConditionStatus::Unknown => Self::Running,
            },
        }
    }

    /// Whether no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for BuildRunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
