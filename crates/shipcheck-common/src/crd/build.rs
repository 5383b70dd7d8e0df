//! Build CRD types
//!
//! A `Build` describes how to produce a container image: which strategy to
//! run, where the source lives and where the image goes. The harness only
//! creates Builds from templates and never writes their status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of build strategy a Build references
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StrategyKind {
    /// Namespaced `BuildStrategy`
    BuildStrategy,
    /// Cluster-scoped `ClusterBuildStrategy`
    #[default]
    ClusterBuildStrategy,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuildStrategy => write!(f, "BuildStrategy"),
            Self::ClusterBuildStrategy => write!(f, "ClusterBuildStrategy"),
        }
    }
}

/// Reference to a build strategy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRef {
    /// Strategy name (e.g. `kaniko`, `buildah`)
    pub name: String,
    /// Strategy kind, defaults to ClusterBuildStrategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StrategyKind>,
}

/// Reference to a secret in the Build's namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

/// Source repository of a Build
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    /// Git URL
    pub url: String,
    /// Sub-directory used as the build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    /// Git revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Secret holding credentials for a private repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretRef>,
}

/// Builder image used by some strategies (s2i, buildpacks)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BuilderImage {
    /// Image reference
    pub image: String,
}

/// Image output of a Build
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BuildOutput {
    /// Target image reference
    pub image: String,
    /// Secret used to push the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretRef>,
}

/// Build specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipwright.io",
    version = "v1alpha1",
    kind = "Build",
    plural = "builds",
    namespaced,
    status = "BuildStatus",
    printcolumn = r#"{"name":"Registered","type":"string","jsonPath":".status.registered"}"#,
    printcolumn = r#"{"name":"Strategy","type":"string","jsonPath":".spec.strategy.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Source repository
    pub source: BuildSource,

    /// Strategy used to build the source
    pub strategy: StrategyRef,

    /// Dockerfile path relative to the context directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    /// Builder image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<BuilderImage>,

    /// Image output
    pub output: BuildOutput,

    /// Maximum build duration (Go duration string, e.g. `15s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Fields this harness does not interpret, passed through unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Build status as written by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    /// "True" once the controller validated the Build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered: Option<String>,
    /// Reason for the registration state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable registration message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
