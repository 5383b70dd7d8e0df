//! Best-effort diagnostics for failed scenarios
//!
//! Collection never fails: every platform error is logged and recorded as a
//! note in the bundle so the scenario report shows what could not be read.
//! Cancelling the run stops collection where it is; whatever was gathered
//! by then is kept.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shipcheck_common::kube_utils::buildrun_selector;

use crate::platform::{BuildPlatform, PodSummary, TaskRunSummary};

const CUT_SHORT_NOTE: &str = "collection cut short by cancellation";

/// Lines of each container log kept in a bundle
pub const DEFAULT_LOG_TAIL_LINES: i64 = 200;

/// Where the build controller runs, for including its logs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerLocation {
    /// Namespace of the controller pods
    pub namespace: String,
    /// Label selector matching the controller pods
    pub label_selector: String,
}

/// What to collect
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Lines kept from the end of each container log
    pub log_tail_lines: i64,
    /// Controller to include logs from, if any
    pub controller: Option<ControllerLocation>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            controller: None,
        }
    }
}

/// Log output of one container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerLog {
    /// Pod name
    pub pod: String,
    /// Container name
    pub container: String,
    /// Tail of the log
    pub content: String,
}

/// Everything gathered about a failed scenario
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiagnosticsBundle {
    /// Namespace the scenario ran in
    pub namespace: String,
    /// Scenario identifier
    pub identifier: String,
    /// BuildRun status as JSON, if the run could be read
    pub build_run_status: Option<String>,
    /// TaskRuns created for the run
    pub task_runs: Vec<TaskRunSummary>,
    /// Pods created for the run
    pub pods: Vec<PodSummary>,
    /// Logs of the build pods
    pub pod_logs: Vec<ContainerLog>,
    /// Logs of the build controller
    pub controller_logs: Vec<ContainerLog>,
    /// What could not be collected
    pub notes: Vec<String>,
}

impl DiagnosticsBundle {
    fn note(&mut self, what: &str, err: impl fmt::Display) {
        warn!(identifier = %self.identifier, error = %err, "Failed to collect {}", what);
        self.notes.push(format!("failed to collect {what}: {err}"));
    }
}

/// Gather diagnostics for the scenario named `identifier`
pub async fn collect(
    platform: &dyn BuildPlatform,
    namespace: &str,
    identifier: &str,
    config: &DiagnosticsConfig,
    cancel: &CancellationToken,
) -> DiagnosticsBundle {
    let mut bundle = DiagnosticsBundle {
        namespace: namespace.to_string(),
        identifier: identifier.to_string(),
        ..Default::default()
    };

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        finished = gather(platform, config, cancel, &mut bundle) => finished,
    };
    if !finished {
        debug!(identifier, "Diagnostics cut short by cancellation");
        bundle.notes.push(CUT_SHORT_NOTE.to_string());
    }

    debug!(
        identifier,
        task_runs = bundle.task_runs.len(),
        logs = bundle.pod_logs.len(),
        notes = bundle.notes.len(),
        "Collected diagnostics"
    );
    bundle
}

/// Returns false if cancellation stopped it between steps
async fn gather(
    platform: &dyn BuildPlatform,
    config: &DiagnosticsConfig,
    cancel: &CancellationToken,
    bundle: &mut DiagnosticsBundle,
) -> bool {
    let namespace = bundle.namespace.clone();
    let identifier = bundle.identifier.clone();
    let selector = buildrun_selector(&identifier);

    match platform.get_build_run(&namespace, &identifier).await {
        Ok(Some(run)) => match run.status.as_ref().map(serde_json::to_string_pretty) {
            Some(Ok(json)) => bundle.build_run_status = Some(json),
            Some(Err(e)) => bundle.note("BuildRun status", e),
            None => bundle.notes.push("BuildRun has no status".to_string()),
        },
        Ok(None) => bundle.notes.push("BuildRun not found".to_string()),
        Err(e) => bundle.note("BuildRun", e),
    }

    match platform.list_task_runs(&namespace, &selector).await {
        Ok(task_runs) => bundle.task_runs = task_runs,
        Err(e) => bundle.note("TaskRuns", e),
    }

    match platform.list_pods(&namespace, &selector).await {
        Ok(pods) => bundle.pods = pods,
        Err(e) => bundle.note("pods", e),
    }

    let pods = bundle.pods.clone();
    for (pod, container) in containers(&pods) {
        if cancel.is_cancelled() {
            return false;
        }
        match platform
            .container_logs(&namespace, pod, container, config.log_tail_lines)
            .await
        {
            Ok(content) => bundle.pod_logs.push(ContainerLog {
                pod: pod.to_string(),
                container: container.to_string(),
                content,
            }),
            Err(e) => bundle.note(&format!("logs of {pod}/{container}"), e),
        }
    }

    match &config.controller {
        Some(controller) if !cancel.is_cancelled() => {
            collect_controller_logs(platform, controller, config.log_tail_lines, cancel, bundle)
                .await
        }
        Some(_) => false,
        None => true,
    }
}

async fn collect_controller_logs(
    platform: &dyn BuildPlatform,
    controller: &ControllerLocation,
    tail_lines: i64,
    cancel: &CancellationToken,
    bundle: &mut DiagnosticsBundle,
) -> bool {
    let pods = match platform
        .list_pods(&controller.namespace, &controller.label_selector)
        .await
    {
        Ok(pods) => pods,
        Err(e) => {
            bundle.note("controller pods", e);
            return true;
        }
    };
    for (pod, container) in containers(&pods) {
        if cancel.is_cancelled() {
            return false;
        }
        match platform
            .container_logs(&controller.namespace, pod, container, tail_lines)
            .await
        {
            Ok(content) => bundle.controller_logs.push(ContainerLog {
                pod: pod.to_string(),
                container: container.to_string(),
                content,
            }),
            Err(e) => bundle.note(&format!("controller logs of {pod}/{container}"), e),
        }
    }
    true
}

fn containers(pods: &[PodSummary]) -> impl Iterator<Item = (&str, &str)> {
    pods.iter().flat_map(|pod| {
        pod.containers
            .iter()
            .map(move |c| (pod.name.as_str(), c.as_str()))
    })
}

impl fmt::Display for DiagnosticsBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Diagnostics for {}/{} ===", self.namespace, self.identifier)?;

        writeln!(f, "--- BuildRun status ---")?;
        match &self.build_run_status {
            Some(status) => writeln!(f, "{status}")?,
            None => writeln!(f, "(unavailable)")?,
        }

        writeln!(f, "--- TaskRuns ({}) ---", self.task_runs.len())?;
        for tr in &self.task_runs {
            match &tr.succeeded {
                Some(c) => writeln!(
                    f,
                    "{}: {} (reason: {}) {}",
                    tr.name, c.status, c.reason, c.message
                )?,
                None => writeln!(f, "{}: no status", tr.name)?,
            }
        }

        writeln!(f, "--- Pods ({}) ---", self.pods.len())?;
        for pod in &self.pods {
            writeln!(f, "{}: {} [{}]", pod.name, pod.phase, pod.containers.join(", "))?;
        }

        for log in &self.pod_logs {
            writeln!(f, "--- Logs {}/{} ---", log.pod, log.container)?;
            writeln!(f, "{}", log.content.trim_end())?;
        }

        for log in &self.controller_logs {
            writeln!(f, "--- Controller logs {}/{} ---", log.pod, log.container)?;
            writeln!(f, "{}", log.content.trim_end())?;
        }

        if !self.notes.is_empty() {
            writeln!(f, "--- Notes ---")?;
            for note in &self.notes {
                writeln!(f, "{note}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBuildPlatform;
    use shipcheck_common::crd::{
        BuildRef, BuildRun, BuildRunSpec, BuildRunStatus, Condition, ConditionStatus,
        CONDITION_SUCCEEDED,
    };
    use shipcheck_common::Error;
    use std::collections::BTreeMap;

    fn failed_run() -> BuildRun {
        let mut run = BuildRun::new(
            "kaniko-abcde",
            BuildRunSpec {
                build_ref: BuildRef {
                    name: "kaniko-abcde".to_string(),
                },
                service_account: None,
                timeout: None,
                extra: BTreeMap::new(),
            },
        );
        run.status = Some(BuildRunStatus {
            conditions: vec![Condition::new(
                CONDITION_SUCCEEDED,
                ConditionStatus::False,
                "Failed",
                "step-build-and-push exited with code 1",
            )],
            ..Default::default()
        });
        run
    }

    fn pod(name: &str, containers: &[&str]) -> PodSummary {
        PodSummary {
            name: name.to_string(),
            phase: "Failed".to_string(),
            containers: containers.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn forbidden() -> Error {
        Error::Platform {
            operation: "list-taskruns".to_string(),
            message: "forbidden".to_string(),
            transient: false,
        }
    }

    #[tokio::test]
    async fn gathers_status_task_runs_and_logs() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_get_build_run()
            .returning(|_, _| Ok(Some(failed_run())));
        mock.expect_list_task_runs().returning(|_, _| {
            Ok(vec![TaskRunSummary {
                name: "kaniko-abcde-xyz".to_string(),
                succeeded: None,
                pod_name: Some("kaniko-abcde-xyz-pod".to_string()),
            }])
        });
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("kaniko-abcde-xyz-pod", &["step-source", "step-build"])]));
        mock.expect_container_logs()
            .returning(|_, _, container, tail| {
                assert_eq!(tail, DEFAULT_LOG_TAIL_LINES);
                Ok(format!("output of {container}\n"))
            });

        let bundle = collect(
            &mock,
            "e2e",
            "kaniko-abcde",
            &DiagnosticsConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(bundle
            .build_run_status
            .as_deref()
            .unwrap()
            .contains("step-build-and-push exited with code 1"));
        assert_eq!(bundle.task_runs.len(), 1);
        assert_eq!(bundle.pod_logs.len(), 2);
        assert!(bundle.notes.is_empty());

        let rendered = bundle.to_string();
        assert!(rendered.contains("--- Logs kaniko-abcde-xyz-pod/step-build ---"));
        assert!(rendered.contains("output of step-source"));
    }

    #[tokio::test]
    async fn platform_errors_become_notes() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_get_build_run().returning(|_, _| Ok(None));
        mock.expect_list_task_runs().returning(|_, _| Err(forbidden()));
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("kaniko-abcde-pod", &["step-build"])]));
        mock.expect_container_logs()
            .returning(|_, _, _, _| Err(forbidden()));

        let bundle = collect(
            &mock,
            "e2e",
            "kaniko-abcde",
            &DiagnosticsConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(bundle.build_run_status.is_none());
        assert_eq!(bundle.notes.len(), 3);
        assert!(bundle.notes[0].contains("BuildRun not found"));
        assert!(bundle.notes[1].contains("TaskRuns"));
        assert!(bundle.notes[2].contains("kaniko-abcde-pod/step-build"));
        assert!(bundle.to_string().contains("--- Notes ---"));
    }

    #[tokio::test]
    async fn cancelled_run_skips_collection() {
        // Any call on a mock without expectations panics
        let mock = MockBuildPlatform::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let bundle =
            collect(&mock, "e2e", "kaniko-abcde", &DiagnosticsConfig::default(), &cancel).await;

        assert!(bundle.build_run_status.is_none());
        assert_eq!(bundle.notes, vec![CUT_SHORT_NOTE.to_string()]);
    }

    #[tokio::test]
    async fn cancellation_keeps_what_was_gathered() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_get_build_run()
            .returning(|_, _| Ok(Some(failed_run())));
        mock.expect_list_task_runs().returning(|_, _| Ok(Vec::new()));
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("kaniko-abcde-pod", &["step-build"])]));
        // Ctrl-C arrives while logs are being read
        mock.expect_container_logs().times(1).returning(move |_, _, _, _| {
            trigger.cancel();
            Ok("partial".to_string())
        });
        let config = DiagnosticsConfig {
            controller: Some(ControllerLocation {
                namespace: "shipwright-build".to_string(),
                label_selector: "name=shipwright-build".to_string(),
            }),
            ..Default::default()
        };

        let bundle = collect(&mock, "e2e", "kaniko-abcde", &config, &cancel).await;

        assert!(bundle.build_run_status.is_some());
        assert_eq!(bundle.pod_logs.len(), 1);
        assert!(bundle.controller_logs.is_empty());
        assert_eq!(bundle.notes.last().map(String::as_str), Some(CUT_SHORT_NOTE));
    }

    #[tokio::test]
    async fn includes_controller_logs_when_configured() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_get_build_run().returning(|_, _| Ok(None));
        mock.expect_list_task_runs().returning(|_, _| Ok(Vec::new()));
        mock.expect_list_pods().returning(|ns, _| {
            if ns == "shipwright-build" {
                Ok(vec![pod("shipwright-build-controller-0", &["manager"])])
            } else {
                Ok(Vec::new())
            }
        });
        mock.expect_container_logs()
            .returning(|_, _, _, _| Ok("reconciling BuildRun".to_string()));

        let config = DiagnosticsConfig {
            controller: Some(ControllerLocation {
                namespace: "shipwright-build".to_string(),
                label_selector: "name=shipwright-build".to_string(),
            }),
            ..Default::default()
        };
        let bundle =
            collect(&mock, "e2e", "kaniko-abcde", &config, &CancellationToken::new()).await;

        assert!(bundle.pod_logs.is_empty());
        assert_eq!(bundle.controller_logs.len(), 1);
        assert_eq!(bundle.controller_logs[0].container, "manager");
    }
}
