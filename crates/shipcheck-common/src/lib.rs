//! Common types for shipcheck: CRDs, errors, polling and Kubernetes helpers

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod poll;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod yaml;

pub use error::Error;
pub use poll::{poll_until, Observation, PollBudget};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the namespace scenarios run in
pub const NAMESPACE_ENV: &str = "TEST_NAMESPACE";

/// Environment variable that enables private-repository scenarios
pub const PRIVATE_REPOS_ENV: &str = "TEST_PRIVATE_REPO";

/// Field manager name used for every write the harness makes
pub const FIELD_MANAGER: &str = "shipcheck";
