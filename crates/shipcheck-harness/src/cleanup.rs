//! Checking that a finished BuildRun leaves no principals behind
//!
//! When a BuildRun asks the controller to generate a service account, the
//! controller must delete it once the run completes. Any service account
//! labelled with the run's name is held to the same rule.

use std::sync::{Arc, Mutex};

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use shipcheck_common::crd::BuildRun;
use shipcheck_common::kube_utils::buildrun_selector;
use shipcheck_common::{poll_until, Error, Observation, PollBudget};

use crate::platform::BuildPlatform;

/// Wait until every ephemeral principal of `build_run` is gone.
///
/// Returns [`Error::CleanupFailure`] naming what is still present when the
/// budget runs out.
pub async fn assert_principals_removed(
    platform: &dyn BuildPlatform,
    build_run: &BuildRun,
    budget: &PollBudget,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let name = build_run.name_any();
    let namespace = build_run
        .namespace()
        .ok_or_else(|| Error::validation(format!("BuildRun {name} has no namespace")))?;
    let generated = build_run.generated_service_account_name();
    let selector = buildrun_selector(&name);
    let resource = format!("principals of BuildRun {namespace}/{name}");
    let remaining = Arc::new(Mutex::new(Vec::<String>::new()));
    let (ns, selector, generated) = (namespace.as_str(), selector.as_str(), generated.as_deref());

    let result = poll_until(&resource, budget, cancel, || {
        let remaining = remaining.clone();
        async move {
            let present = enumerate(platform, ns, selector, generated).await?;
            if present.is_empty() {
                return Ok(Observation::Ready(()));
            }
            let summary = format!("{} remaining: {}", present.len(), present.join(", "));
            if let Ok(mut last) = remaining.lock() {
                *last = present;
            }
            Ok(Observation::Pending(summary))
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!(buildrun = %name, "Ephemeral principals removed");
            Ok(())
        }
        Err(Error::Timeout { waited, .. }) => {
            let remaining = remaining.lock().map(|r| r.clone()).unwrap_or_default();
            Err(Error::CleanupFailure {
                resource: format!("BuildRun {namespace}/{name}"),
                remaining,
                waited,
            })
        }
        Err(e) => Err(e),
    }
}

/// Service accounts currently present for a run: the generated one if it
/// still exists, plus anything carrying the run's label
async fn enumerate(
    platform: &dyn BuildPlatform,
    namespace: &str,
    selector: &str,
    generated: Option<&str>,
) -> Result<Vec<String>, Error> {
    let mut present = platform.list_service_accounts(namespace, selector).await?;
    if let Some(generated) = generated {
        if !present.iter().any(|n| n == generated)
            && platform.service_account_exists(namespace, generated).await?
        {
            present.push(generated.to_string());
        }
    }
    present.sort();
    debug!(namespace, selector, count = present.len(), "Enumerated principals");
    Ok(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBuildPlatform;
    use shipcheck_common::crd::{BuildRef, BuildRunSpec, ServiceAccountSpec};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn build_run(generate: bool) -> BuildRun {
        let mut run = BuildRun::new(
            "buildah-q1w2e",
            BuildRunSpec {
                build_ref: BuildRef {
                    name: "buildah-q1w2e".to_string(),
                },
                service_account: Some(ServiceAccountSpec {
                    name: None,
                    generate: Some(generate),
                }),
                timeout: None,
                extra: BTreeMap::new(),
            },
        );
        run.metadata.namespace = Some("e2e".to_string());
        run
    }

    fn budget() -> PollBudget {
        PollBudget::from_secs(10, 1).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn passes_once_generated_account_is_deleted() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_list_service_accounts().returning(|ns, selector| {
            assert_eq!(ns, "e2e");
            assert_eq!(selector, "buildrun.shipwright.io/name=buildah-q1w2e");
            Ok(Vec::new())
        });
        mock.expect_service_account_exists().returning(move |_, name| {
            assert_eq!(name, "buildah-q1w2e-sa");
            Ok(c.fetch_add(1, Ordering::SeqCst) < 2)
        });

        assert_principals_removed(&mock, &build_run(true), &budget(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_accounts_fail_with_names() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_list_service_accounts()
            .returning(|_, _| Ok(vec!["buildah-q1w2e-pipeline".to_string()]));
        mock.expect_service_account_exists().returning(|_, _| Ok(true));

        let err =
            assert_principals_removed(&mock, &build_run(true), &budget(), &CancellationToken::new())
                .await
                .unwrap_err();
        match err {
            Error::CleanupFailure {
                resource,
                remaining,
                ..
            } => {
                assert_eq!(resource, "BuildRun e2e/buildah-q1w2e");
                assert_eq!(remaining, vec!["buildah-q1w2e-pipeline", "buildah-q1w2e-sa"]);
            }
            other => panic!("expected CleanupFailure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn without_generation_only_labelled_accounts_count() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_list_service_accounts().returning(|_, _| Ok(Vec::new()));
        mock.expect_service_account_exists().never();

        assert_principals_removed(&mock, &build_run(false), &budget(), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_list_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_list_service_accounts().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Platform {
                    operation: "list-serviceaccounts".to_string(),
                    message: "429 too many requests".to_string(),
                    transient: true,
                })
            } else {
                Ok(Vec::new())
            }
        });
        mock.expect_service_account_exists().returning(|_, _| Ok(false));

        assert_principals_removed(&mock, &build_run(true), &budget(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_without_namespace_is_rejected() {
        let mut run = build_run(true);
        run.metadata.namespace = None;
        let err = assert_principals_removed(
            &MockBuildPlatform::new(),
            &run,
            &budget(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
