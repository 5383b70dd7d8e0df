//! Kubernetes client helpers using kube-rs

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

use crate::retry::{retry_if, RetryConfig};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// API version of the execution engine's TaskRun
pub const TASKRUN_API_VERSION: &str = "tekton.dev/v1beta1";
/// Kind of the execution engine's TaskRun
pub const TASKRUN_KIND: &str = "TaskRun";

/// Install the process-wide rustls crypto provider.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a client and wait until the API server answers.
///
/// The version probe is retried with backoff while the failure looks
/// transient (connection refused, 5xx); anything else fails immediately.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let client = create_client(kubeconfig).await?;
    let info = retry_if(
        &RetryConfig::with_max_attempts(10),
        "apiserver_version",
        || {
            let client = client.clone();
            async move { client.apiserver_version().await.map_err(Error::from) }
        },
        Error::is_transient,
    )
    .await?;
    debug!(version = %info.git_version, "Connected to API server");
    Ok(client)
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use shipcheck_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("tekton.dev/v1beta1"), ("tekton.dev".to_string(), "v1beta1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// ApiResource for the execution engine's TaskRun
pub fn taskrun_api_resource() -> ApiResource {
    build_api_resource(TASKRUN_API_VERSION, TASKRUN_KIND)
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Label selector matching everything created for one BuildRun
pub fn buildrun_selector(buildrun_name: &str) -> String {
    format!("{}={}", crate::crd::BUILDRUN_NAME_LABEL, buildrun_name)
}
