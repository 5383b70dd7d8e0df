//! Custom Resource Definitions for the build platform
//!
//! Only the fields the harness reads or submits are modelled; everything
//! else in a template is passed through untouched.

mod build;
mod buildrun;
mod types;

pub use build::{
    Build, BuildOutput, BuildSource, BuildSpec, BuildStatus, BuilderImage, SecretRef,
    StrategyKind, StrategyRef,
};
pub use buildrun::{
    BuildRef, BuildRun, BuildRunSpec, BuildRunStatus, FailedAt, ServiceAccountSpec,
    BUILDRUN_NAME_LABEL, GENERATED_SERVICE_ACCOUNT_SUFFIX,
};
pub use types::{BuildRunPhase, Condition, ConditionStatus, CONDITION_SUCCEEDED, REASON_PENDING};
