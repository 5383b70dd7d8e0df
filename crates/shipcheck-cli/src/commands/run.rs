//! Run command - execute scenarios against the cluster
//!
//! Ctrl-C and the optional suite deadline cancel every in-flight wait;
//! scenarios that had not started yet are reported as cancelled and the
//! run exits non-zero.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use shipcheck_common::kube_utils;
use shipcheck_common::{PollBudget, NAMESPACE_ENV};
use shipcheck_harness::diagnostics::{ControllerLocation, DEFAULT_LOG_TAIL_LINES};
use shipcheck_harness::{GateConfig, KubePlatform, RunSettings, ScenarioRunner};

use super::{catalog_path, select_scenarios, DEFAULT_FIXTURES_DIR};
use crate::{Error, Result};

/// Run scenarios against a build platform cluster
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Namespace the scenarios run in
    #[arg(long, short = 'n', env = NAMESPACE_ENV)]
    pub namespace: String,

    /// Path to kubeconfig (defaults to $KUBECONFIG, ~/.kube/config or in-cluster config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Directory holding the resource templates and scenarios.yaml
    #[arg(long, env = "SHIPCHECK_FIXTURES", default_value = DEFAULT_FIXTURES_DIR)]
    pub fixtures: PathBuf,

    /// Catalog file (defaults to scenarios.yaml in the fixtures directory);
    /// templates resolve relative to its directory
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only run scenarios whose label contains this string
    #[arg(long)]
    pub filter: Option<String>,

    /// How long to wait for each BuildRun, in seconds
    #[arg(long, env = "SHIPCHECK_TIMEOUT_SECS", default_value = "300")]
    pub timeout_secs: u64,

    /// Time between status checks, in seconds
    #[arg(long, env = "SHIPCHECK_RETRY_INTERVAL_SECS", default_value = "5")]
    pub retry_interval_secs: u64,

    /// How long generated service accounts may outlive their BuildRun, in seconds
    #[arg(long, env = "SHIPCHECK_CLEANUP_TIMEOUT_SECS", default_value = "60")]
    pub cleanup_timeout_secs: u64,

    /// Time between cleanup checks, in seconds
    #[arg(long, default_value = "2")]
    pub cleanup_retry_interval_secs: u64,

    /// Cancel the whole run after this many seconds
    #[arg(long, env = "SHIPCHECK_SUITE_TIMEOUT_SECS")]
    pub suite_timeout_secs: Option<u64>,

    /// Scenarios in flight at once
    #[arg(long, short = 'j', default_value = "4")]
    pub concurrency: usize,

    /// Run private repository scenarios (also enabled by TEST_PRIVATE_REPO=true)
    #[arg(long)]
    pub private_repos: bool,

    /// Delete each scenario's Build and BuildRun when it finishes
    #[arg(long)]
    pub delete_resources: bool,

    /// Lines kept from the end of each container log in diagnostics
    #[arg(long, default_value_t = DEFAULT_LOG_TAIL_LINES)]
    pub log_tail_lines: i64,

    /// Namespace of the build controller, to include its logs in diagnostics
    #[arg(long)]
    pub controller_namespace: Option<String>,

    /// Label selector for the build controller pods
    #[arg(long, default_value = "name=shipwright-build")]
    pub controller_selector: String,
}

impl RunArgs {
    fn settings(&self, fixtures_root: &Path) -> Result<RunSettings> {
        if self.namespace.trim().is_empty() {
            return Err(Error::validation("namespace must not be empty"));
        }
        let budget = PollBudget::from_secs(self.timeout_secs, self.retry_interval_secs)?;
        let cleanup_budget =
            PollBudget::from_secs(self.cleanup_timeout_secs, self.cleanup_retry_interval_secs)?;

        let mut settings =
            RunSettings::new(self.namespace.clone(), fixtures_root, budget, cleanup_budget);
        settings.gates = GateConfig {
            private_repositories: self.private_repos
                || GateConfig::from_env().private_repositories,
        };
        settings.delete_resources = self.delete_resources;
        settings.diagnostics.log_tail_lines = self.log_tail_lines;
        settings.diagnostics.controller = self.controller_namespace.as_ref().map(|namespace| {
            ControllerLocation {
                namespace: namespace.clone(),
                label_selector: self.controller_selector.clone(),
            }
        });
        Ok(settings)
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let catalog = catalog_path(&args.fixtures, args.catalog.as_deref());
    let scenarios = select_scenarios(&catalog, args.filter.as_deref())?;
    let fixtures_root = catalog
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| args.fixtures.clone());
    let settings = args.settings(&fixtures_root)?;

    info!(
        namespace = %settings.namespace,
        catalog = %catalog.display(),
        scenarios = scenarios.len(),
        private_repositories = settings.gates.private_repositories,
        "Connecting to cluster"
    );
    let client = kube_utils::connect(args.kubeconfig.as_deref()).await?;

    let cancel = CancellationToken::new();
    let watcher = cancel_on_interrupt(
        cancel.clone(),
        args.suite_timeout_secs.map(Duration::from_secs),
    );

    let runner = ScenarioRunner::new(Arc::new(KubePlatform::new(client)), settings, cancel.clone())?;
    let report = runner.run_suite(&scenarios, args.concurrency).await;

    watcher.abort();
    println!("{report}");
    report.log_summary();
    report.finish().map_err(Error::ScenariosFailed)
}

/// Cancel `cancel` on Ctrl-C or once `suite_timeout` has passed
fn cancel_on_interrupt(cancel: CancellationToken, suite_timeout: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        let deadline = async {
            match suite_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interrupted => warn!("Interrupted, cancelling remaining scenarios"),
            _ = deadline => warn!(
                timeout_secs = suite_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                "Suite timeout reached, cancelling remaining scenarios"
            ),
        }
        cancel.cancel();
    })
}
