//! Scenario execution
//!
//! A [`Scenario`] is pure data: a label, two templates and an expected
//! outcome. [`ScenarioRunner`] executes it step by step against the
//! platform, threading a [`ScenarioContext`] through every step:
//!
//! ```text
//! NotSubmitted -> Submitted -> Polling -> Succeeded | Failed | TimedOut | Cancelled
//! Succeeded -> CleanupPending -> CleanedUp | CleanupFailed
//! ```
//!
//! The cleanup check only runs after a run that was expected to succeed
//! did succeed.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use shipcheck_common::crd::BuildRunPhase;
use shipcheck_common::{Error, PollBudget, PRIVATE_REPOS_ENV};

use crate::cleanup;
use crate::diagnostics::{self, DiagnosticsConfig};
use crate::identifier;
use crate::outcome::{self, ExpectedOutcome};
use crate::platform::{BuildPlatform, ResourceHandle, ResourceKind};
use crate::poller::{self, CompletedRun, TerminalStatus};
use crate::report::{ScenarioReport, SuiteReport, Verdict};
use crate::submit::Submitter;

/// An environment condition a scenario depends on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gate {
    /// Credentials for private source repositories are provisioned
    PrivateRepositories,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateRepositories => f.write_str("private-repositories"),
        }
    }
}

/// Which gates are open for this run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateConfig {
    /// Private repository scenarios may run
    pub private_repositories: bool,
}

impl GateConfig {
    /// Read gates from the environment.
    ///
    /// Private repository scenarios run only when `TEST_PRIVATE_REPO` is
    /// exactly `true`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read gates through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            private_repositories: lookup(PRIVATE_REPOS_ENV).is_some_and(|v| v == "true"),
        }
    }

    /// Why a scenario requiring `gate` must be skipped, `None` if it may run
    pub fn skip_reason(&self, gate: Gate) -> Option<String> {
        match gate {
            Gate::PrivateRepositories if !self.private_repositories => Some(format!(
                "requires {gate}; set {PRIVATE_REPOS_ENV}=true to enable"
            )),
            Gate::PrivateRepositories => None,
        }
    }
}

/// One end-to-end scenario
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Short description, also the prefix of the generated identifier
    pub label: String,
    /// Build template, relative to the fixtures root unless absolute
    pub definition_template: PathBuf,
    /// BuildRun template, relative to the fixtures root unless absolute
    pub execution_template: PathBuf,
    /// What the BuildRun is expected to do
    #[serde(default, rename = "expect")]
    pub expected: ExpectedOutcome,
    /// Environment condition the scenario depends on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Gate>,
}

/// Where a scenario is in its lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScenarioState {
    /// Nothing created yet, or only the Build
    #[default]
    NotSubmitted,
    /// The BuildRun was created
    Submitted,
    /// Waiting for the BuildRun to finish
    Polling,
    /// The BuildRun succeeded
    Succeeded,
    /// The BuildRun failed
    Failed,
    /// The BuildRun did not finish within the budget
    TimedOut,
    /// Waiting was cancelled
    Cancelled,
    /// Waiting for generated principals to be removed
    CleanupPending,
    /// Generated principals are gone
    CleanedUp,
    /// Generated principals outlived the cleanup budget
    CleanupFailed,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSubmitted => "NotSubmitted",
            Self::Submitted => "Submitted",
            Self::Polling => "Polling",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::Cancelled => "Cancelled",
            Self::CleanupPending => "CleanupPending",
            Self::CleanedUp => "CleanedUp",
            Self::CleanupFailed => "CleanupFailed",
        };
        f.write_str(s)
    }
}

/// Per-scenario state passed explicitly through every step
#[derive(Debug)]
pub struct ScenarioContext {
    label: String,
    identifier: String,
    namespace: String,
    state: ScenarioState,
    definition: Option<ResourceHandle>,
    execution: Option<ResourceHandle>,
    terminal: Option<TerminalStatus>,
}

impl ScenarioContext {
    /// Fresh context for a scenario about to start
    pub fn new(label: &str, identifier: String, namespace: &str) -> Self {
        Self {
            label: label.to_string(),
            identifier,
            namespace: namespace.to_string(),
            state: ScenarioState::NotSubmitted,
            definition: None,
            execution: None,
            terminal: None,
        }
    }

    /// Scenario label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name shared by the scenario's Build and BuildRun
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Namespace the scenario runs in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current state
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// The submitted Build
    pub fn definition(&self) -> Option<&ResourceHandle> {
        self.definition.as_ref()
    }

    /// The submitted BuildRun
    pub fn execution(&self) -> Option<&ResourceHandle> {
        self.execution.as_ref()
    }

    /// Terminal status, once observed
    pub fn terminal_status(&self) -> Option<&TerminalStatus> {
        self.terminal.as_ref()
    }

    fn transition(&mut self, next: ScenarioState) {
        debug!(scenario = %self.identifier, from = %self.state, to = %next, "State change");
        self.state = next;
    }
}

/// Everything a runner needs to know about its environment
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Namespace all scenarios run in
    pub namespace: String,
    /// Directory relative template paths are resolved against
    pub fixtures_root: PathBuf,
    /// Budget for submission retries and waiting for a BuildRun
    pub budget: PollBudget,
    /// Budget for waiting on principal removal
    pub cleanup_budget: PollBudget,
    /// Open gates
    pub gates: GateConfig,
    /// What to collect for failed scenarios
    pub diagnostics: DiagnosticsConfig,
    /// Delete the Build and BuildRun after each scenario
    pub delete_resources: bool,
}

impl RunSettings {
    /// Settings with gates closed, default diagnostics and resources kept
    pub fn new(
        namespace: impl Into<String>,
        fixtures_root: impl Into<PathBuf>,
        budget: PollBudget,
        cleanup_budget: PollBudget,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            fixtures_root: fixtures_root.into(),
            budget,
            cleanup_budget,
            gates: GateConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            delete_resources: false,
        }
    }
}

/// Executes scenarios against a platform
pub struct ScenarioRunner {
    platform: Arc<dyn BuildPlatform>,
    submitter: Submitter,
    settings: RunSettings,
    cancel: CancellationToken,
}

impl ScenarioRunner {
    /// Create a runner; `cancel` aborts every wait of every scenario
    pub fn new(
        platform: Arc<dyn BuildPlatform>,
        settings: RunSettings,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let submitter = Submitter::new(platform.clone())?;
        Ok(Self {
            platform,
            submitter,
            settings,
            cancel,
        })
    }

    /// Settings this runner was created with
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Start a scenario, generating its identifier
    pub fn begin(&self, label: &str) -> ScenarioContext {
        ScenarioContext::new(label, identifier::generate(label), &self.settings.namespace)
    }

    /// Create the scenario's Build
    pub async fn submit_definition(
        &self,
        ctx: &mut ScenarioContext,
        template: &Path,
    ) -> Result<ResourceHandle, Error> {
        if ctx.definition.is_some() {
            return Err(Error::validation(format!(
                "scenario {} already submitted its Build",
                ctx.identifier
            )));
        }
        let handle = self.submit(ResourceKind::Build, ctx, template).await?;
        ctx.definition = Some(handle.clone());
        Ok(handle)
    }

    /// Create the scenario's BuildRun, after its Build
    pub async fn submit_execution(
        &self,
        ctx: &mut ScenarioContext,
        template: &Path,
    ) -> Result<ResourceHandle, Error> {
        if ctx.definition.is_none() {
            return Err(Error::validation(format!(
                "scenario {} must submit its Build before its BuildRun",
                ctx.identifier
            )));
        }
        if ctx.execution.is_some() {
            return Err(Error::validation(format!(
                "scenario {} already submitted its BuildRun",
                ctx.identifier
            )));
        }
        let handle = self.submit(ResourceKind::BuildRun, ctx, template).await?;
        ctx.execution = Some(handle.clone());
        ctx.transition(ScenarioState::Submitted);
        Ok(handle)
    }

    /// Wait for the BuildRun, require success, then require its generated
    /// principals to be removed
    pub async fn await_success(&self, ctx: &mut ScenarioContext) -> Result<(), Error> {
        let completed = self.await_terminal(ctx).await?;
        let handle = self.execution_handle(ctx)?;
        outcome::expect_success(&handle, &completed.status)?;

        ctx.transition(ScenarioState::CleanupPending);
        match cleanup::assert_principals_removed(
            self.platform.as_ref(),
            &completed.build_run,
            &self.settings.cleanup_budget,
            &self.cancel,
        )
        .await
        {
            Ok(()) => {
                ctx.transition(ScenarioState::CleanedUp);
                Ok(())
            }
            Err(e) => {
                ctx.transition(match e {
                    Error::Cancelled { .. } => ScenarioState::Cancelled,
                    _ => ScenarioState::CleanupFailed,
                });
                Err(e)
            }
        }
    }

    /// Wait for the BuildRun and require it to fail with a message matching
    /// `pattern`
    pub async fn await_failure(
        &self,
        ctx: &mut ScenarioContext,
        pattern: &str,
    ) -> Result<(), Error> {
        // Reject a bad pattern before spending the poll budget
        ExpectedOutcome::Fail {
            message_pattern: pattern.to_string(),
        }
        .validate()?;

        let completed = self.await_terminal(ctx).await?;
        let handle = self.execution_handle(ctx)?;
        outcome::expect_failure(&handle, &completed.status, pattern)
    }

    /// Run one scenario to completion and report on it.
    ///
    /// Never returns an error: failures, including panics inside a step,
    /// end up in the report's verdict.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        if let Some(reason) = scenario
            .requires
            .and_then(|gate| self.settings.gates.skip_reason(gate))
        {
            info!(scenario = %scenario.label, reason = %reason, "Skipping scenario");
            return ScenarioReport::skipped(&scenario.label, scenario.expected.clone(), reason);
        }
        if self.cancel.is_cancelled() {
            debug!(scenario = %scenario.label, "Run cancelled before the scenario started");
            return ScenarioReport::cancelled(&scenario.label, scenario.expected.clone());
        }

        let start = Instant::now();
        let mut ctx = self.begin(&scenario.label);
        let span = info_span!("scenario", label = %scenario.label, id = %ctx.identifier);

        let result = AssertUnwindSafe(self.execute(&mut ctx, scenario))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|panic| {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::internal_with_context("scenario", format!("PANIC: {msg}")))
            });

        let verdict = match result {
            Ok(()) => {
                span.in_scope(|| info!(state = %ctx.state, "Scenario passed"));
                Verdict::Passed
            }
            Err(error) => {
                span.in_scope(|| {
                    error!(
                        state = %ctx.state,
                        kind = error.kind_name(),
                        error = %error,
                        "Scenario failed"
                    )
                });
                let diagnostics = if error.is_fatal() {
                    None
                } else {
                    let bundle = diagnostics::collect(
                        self.platform.as_ref(),
                        &ctx.namespace,
                        &ctx.identifier,
                        &self.settings.diagnostics,
                        &self.cancel,
                    )
                    .instrument(span.clone())
                    .await;
                    Some(Box::new(bundle))
                };
                Verdict::Failed { error, diagnostics }
            }
        };

        if self.settings.delete_resources {
            self.delete_resources(&ctx).instrument(span).await;
        }
        identifier::release(&ctx.identifier);

        ScenarioReport {
            label: scenario.label.clone(),
            identifier: Some(ctx.identifier.clone()),
            expected: scenario.expected.clone(),
            actual: ctx.terminal.clone(),
            state: ctx.state,
            verdict,
            duration: start.elapsed(),
        }
    }

    /// Run scenarios with up to `concurrency` in flight.
    ///
    /// An error that must abort the run (an unreadable template) cancels
    /// every other scenario. Scenarios not yet started when the run is
    /// cancelled, for whatever reason, are reported as cancelled and the
    /// suite as aborted.
    pub async fn run_suite(&self, scenarios: &[Scenario], concurrency: usize) -> SuiteReport {
        let start = Instant::now();
        let concurrency = concurrency.max(1);
        info!(
            scenarios = scenarios.len(),
            concurrency,
            namespace = %self.settings.namespace,
            "Starting suite"
        );

        let mut in_flight = futures::stream::iter(scenarios.iter().enumerate())
            .map(|(idx, scenario)| async move { (idx, self.run(scenario).await) })
            .buffer_unordered(concurrency);

        let mut reports = Vec::with_capacity(scenarios.len());
        let mut aborted = None;
        while let Some((idx, report)) = in_flight.next().await {
            if aborted.is_none() {
                if let Some(fatal) = report.fatal_error() {
                    error!(scenario = %report.label, error = %fatal, "Aborting run");
                    aborted = Some(format!("{}: {fatal}", report.label));
                    self.cancel.cancel();
                }
            }
            reports.push((idx, report));
        }
        if aborted.is_none() && self.cancel.is_cancelled() {
            warn!("Run cancelled before every scenario finished");
            aborted = Some("run cancelled".to_string());
        }
        reports.sort_by_key(|(idx, _)| *idx);

        SuiteReport {
            scenarios: reports.into_iter().map(|(_, r)| r).collect(),
            duration: start.elapsed(),
            aborted,
        }
    }

    async fn execute(&self, ctx: &mut ScenarioContext, scenario: &Scenario) -> Result<(), Error> {
        let definition = self.resolve(&scenario.definition_template);
        let execution = self.resolve(&scenario.execution_template);

        self.submit_definition(ctx, &definition).await?;
        self.submit_execution(ctx, &execution).await?;
        match &scenario.expected {
            ExpectedOutcome::Succeed => self.await_success(ctx).await,
            ExpectedOutcome::Fail { message_pattern } => {
                self.await_failure(ctx, message_pattern).await
            }
        }
    }

    async fn submit(
        &self,
        kind: ResourceKind,
        ctx: &ScenarioContext,
        template: &Path,
    ) -> Result<ResourceHandle, Error> {
        self.submitter
            .submit(
                kind,
                &ctx.namespace,
                &ctx.identifier,
                template,
                &self.settings.budget,
                &self.cancel,
            )
            .await
    }

    async fn await_terminal(&self, ctx: &mut ScenarioContext) -> Result<CompletedRun, Error> {
        let handle = self.execution_handle(ctx)?;
        ctx.transition(ScenarioState::Polling);

        match poller::await_terminal(
            self.platform.as_ref(),
            &handle,
            &self.settings.budget,
            &self.cancel,
        )
        .await
        {
            Ok(completed) => {
                ctx.transition(match completed.status.phase {
                    BuildRunPhase::Succeeded => ScenarioState::Succeeded,
                    _ => ScenarioState::Failed,
                });
                ctx.terminal = Some(completed.status.clone());
                Ok(completed)
            }
            Err(e) => {
                match e {
                    Error::Timeout { .. } => ctx.transition(ScenarioState::TimedOut),
                    Error::Cancelled { .. } => ctx.transition(ScenarioState::Cancelled),
                    _ => {}
                }
                Err(e)
            }
        }
    }

    fn execution_handle(&self, ctx: &ScenarioContext) -> Result<ResourceHandle, Error> {
        ctx.execution.clone().ok_or_else(|| {
            Error::validation(format!(
                "scenario {} has no BuildRun to wait for",
                ctx.identifier
            ))
        })
    }

    fn resolve(&self, template: &Path) -> PathBuf {
        if template.is_absolute() {
            template.to_path_buf()
        } else {
            self.settings.fixtures_root.join(template)
        }
    }

    async fn delete_resources(&self, ctx: &ScenarioContext) {
        for handle in [ctx.execution.as_ref(), ctx.definition.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.submitter.delete(handle).await {
                warn!(resource = %handle, error = %e, "Failed to delete scenario resource");
            }
        }
    }
}
