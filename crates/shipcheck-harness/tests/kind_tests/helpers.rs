//! Shared setup for cluster-backed scenario tests

use std::path::PathBuf;
use std::sync::Arc;

use kube::Client;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use shipcheck_common::kube_utils::{connect, install_crypto_provider};
use shipcheck_common::telemetry::init_test_logging;
use shipcheck_common::{PollBudget, NAMESPACE_ENV};
use shipcheck_harness::catalog;
use shipcheck_harness::{GateConfig, KubePlatform, RunSettings, Scenario, ScenarioRunner};

/// Namespace used when `TEST_NAMESPACE` is unset
pub const DEFAULT_TEST_NAMESPACE: &str = "shipcheck-e2e";

/// One client per test binary; connecting retries while the API server settles
static CLIENT: OnceCell<Result<Client, String>> = OnceCell::const_new();

/// Connect to the cluster from the ambient kubeconfig
pub async fn test_client() -> Result<Client, String> {
    install_crypto_provider();
    init_test_logging();
    CLIENT
        .get_or_init(|| async { connect(None).await.map_err(|e| e.to_string()) })
        .await
        .clone()
}

/// Namespace scenarios run in
pub fn test_namespace() -> String {
    std::env::var(NAMESPACE_ENV).unwrap_or_else(|_| DEFAULT_TEST_NAMESPACE.to_string())
}

/// Directory holding the bundled templates and catalog
pub fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

/// Every scenario in the bundled catalog
pub fn bundled_catalog() -> Vec<Scenario> {
    catalog::load(&fixtures_root().join("scenarios.yaml")).expect("bundled catalog should load")
}

/// A bundled scenario by label
pub fn bundled_scenario(label: &str) -> Scenario {
    bundled_catalog()
        .into_iter()
        .find(|s| s.label == label)
        .unwrap_or_else(|| panic!("no scenario {label} in bundled catalog"))
}

/// Runner with the default budgets and gates read from the environment
pub async fn test_runner() -> ScenarioRunner {
    let client = test_client().await.expect("cluster should be reachable");
    let mut settings = RunSettings::new(
        test_namespace(),
        fixtures_root(),
        PollBudget::from_secs(300, 5).expect("valid budget"),
        PollBudget::from_secs(60, 2).expect("valid budget"),
    );
    settings.gates = GateConfig::from_env();
    ScenarioRunner::new(
        Arc::new(KubePlatform::new(client)),
        settings,
        CancellationToken::new(),
    )
    .expect("runner should build")
}
