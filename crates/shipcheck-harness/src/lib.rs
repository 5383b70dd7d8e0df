//! End-to-end scenario harness for a Kubernetes build platform
//!
//! Each scenario submits a `Build` and a `BuildRun` rendered from templates,
//! waits for the build controller to drive the run to a terminal state,
//! checks that state against an expected outcome and, for successful runs,
//! checks that the service accounts generated for the run were removed.
//! Failed scenarios carry a diagnostics bundle with the run's status and
//! the logs of its build pods.

#![deny(missing_docs)]

pub mod catalog;
pub mod cleanup;
pub mod diagnostics;
pub mod identifier;
pub mod outcome;
pub mod platform;
pub mod poller;
pub mod report;
pub mod scenario;
pub mod submit;

pub use outcome::ExpectedOutcome;
pub use platform::{BuildPlatform, KubePlatform, ResourceHandle, ResourceKind};
pub use poller::TerminalStatus;
pub use report::{ScenarioReport, SuiteReport, Verdict};
pub use scenario::{
    Gate, GateConfig, RunSettings, Scenario, ScenarioContext, ScenarioRunner, ScenarioState,
};
