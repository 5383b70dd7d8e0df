//! BuildRun CRD types
//!
//! A `BuildRun` is one invocation of a `Build`. Its status is written
//! exclusively by the build controller; the harness only reads it.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BuildRunPhase, Condition, CONDITION_SUCCEEDED};

/// Suffix the controller appends to a BuildRun name for its generated
/// service account
pub const GENERATED_SERVICE_ACCOUNT_SUFFIX: &str = "-sa";

/// Label the controller puts on everything it creates for a BuildRun
pub const BUILDRUN_NAME_LABEL: &str = "buildrun.shipwright.io/name";

/// Reference from a BuildRun to its Build
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRef {
    /// Name of the Build in the same namespace
    pub name: String,
}

/// Service account selection for a BuildRun
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSpec {
    /// Existing service account to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ask the controller to generate a temporary service account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<bool>,
}

/// BuildRun specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipwright.io",
    version = "v1alpha1",
    kind = "BuildRun",
    plural = "buildruns",
    shortname = "br",
    namespaced,
    status = "BuildRunStatus",
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunSpec {
    /// The Build this run executes
    pub build_ref: BuildRef,

    /// Service account to run the build steps under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountSpec>,

    /// Overrides the Build timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Fields this harness does not interpret, passed through unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Location of the step that failed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct FailedAt {
    /// Pod name
    #[serde(default)]
    pub pod: String,
    /// Container name
    #[serde(default)]
    pub container: String,
}

/// BuildRun status as written by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunStatus {
    /// Status conditions, the controller writes a single `Succeeded` one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the execution-engine TaskRun backing this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_task_run_ref: Option<String>,

    /// When the run started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the run finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Where the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<FailedAt>,
}

impl BuildRunStatus {
    /// The `Succeeded` condition, if the controller wrote one
    pub fn succeeded_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == CONDITION_SUCCEEDED)
    }
}

impl BuildRun {
    /// Current phase derived from the `Succeeded` condition
    pub fn phase(&self) -> BuildRunPhase {
        BuildRunPhase::from_condition(
            self.status
                .as_ref()
                .and_then(|s| s.succeeded_condition()),
        )
    }

    /// Whether the controller is asked to generate a service account
    pub fn generates_service_account(&self) -> bool {
        self.spec
            .service_account
            .as_ref()
            .and_then(|sa| sa.generate)
            .unwrap_or(false)
    }

    /// Name of the service account the controller generates for this run
    pub fn generated_service_account_name(&self) -> Option<String> {
        let name = self.metadata.name.as_deref()?;
        self.generates_service_account()
            .then(|| format!("{name}{GENERATED_SERVICE_ACCOUNT_SUFFIX}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;

    fn build_run(generate: Option<bool>) -> BuildRun {
        let mut run = BuildRun::new(
            "buildah-q1w2e",
            BuildRunSpec {
                build_ref: BuildRef {
                    name: "buildah-q1w2e".to_string(),
                },
                service_account: Some(ServiceAccountSpec {
                    name: None,
                    generate,
                }),
                timeout: None,
                extra: BTreeMap::new(),
            },
        );
        run.metadata.namespace = Some("e2e".to_string());
        run
    }

    #[test]
    fn generated_service_account_follows_run_name() {
        let run = build_run(Some(true));
        assert_eq!(
            run.generated_service_account_name().as_deref(),
            Some("buildah-q1w2e-sa")
        );
        assert_eq!(build_run(Some(false)).generated_service_account_name(), None);
        assert_eq!(build_run(None).generated_service_account_name(), None);
    }

    #[test]
    fn phase_reads_succeeded_condition() {
        let mut run = build_run(None);
        assert_eq!(run.phase(), BuildRunPhase::Pending);

        run.status = Some(BuildRunStatus {
            conditions: vec![Condition::new(
                CONDITION_SUCCEEDED,
                ConditionStatus::Unknown,
                "Running",
                "Not all Steps in the Task have finished executing",
            )],
            ..Default::default()
        });
        assert_eq!(run.phase(), BuildRunPhase::Running);
    }

    #[test]
    fn unrelated_conditions_are_ignored() {
        let status = BuildRunStatus {
            conditions: vec![Condition::new(
                "Registered",
                ConditionStatus::True,
                "Succeeded",
                "",
            )],
            ..Default::default()
        };
        assert!(status.succeeded_condition().is_none());
    }
}
