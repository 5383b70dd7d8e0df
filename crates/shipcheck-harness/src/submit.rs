//! Resource submission
//!
//! Turns a template document into a typed Build or BuildRun named after the
//! scenario identifier and creates it on the platform. Transient platform
//! conditions (namespace still initializing, API throttling, 5xx) are
//! retried within the scenario's poll budget.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shipcheck_common::crd::{Build, BuildRun};
use shipcheck_common::template::{TemplateContext, TemplateEngine};
use shipcheck_common::yaml::parse_yaml;
use shipcheck_common::{poll_until, Error, Observation, PollBudget};

use crate::platform::{BuildPlatform, ResourceHandle, ResourceKind};

/// A rendered resource ready to be created
#[derive(Clone, Debug)]
pub enum PreparedResource {
    /// Build definition
    Build(Build),
    /// Build execution
    BuildRun(BuildRun),
}

impl PreparedResource {
    /// Kind of the resource
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Build(_) => ResourceKind::Build,
            Self::BuildRun(_) => ResourceKind::BuildRun,
        }
    }
}

/// Creates scenario resources from template documents
pub struct Submitter {
    platform: Arc<dyn BuildPlatform>,
    engine: TemplateEngine,
}

impl Submitter {
    /// Create a submitter for the given platform
    pub fn new(platform: Arc<dyn BuildPlatform>) -> Result<Self, Error> {
        let engine = TemplateEngine::new()
            .map_err(|e| Error::internal_with_context("template_engine", e.to_string()))?;
        Ok(Self { platform, engine })
    }

    /// Load, render and create one resource.
    ///
    /// An unreadable template is [`Error::Template`], which aborts the run.
    /// A template that renders to something other than a `kind` resource,
    /// or a create the platform rejects permanently, fails only this
    /// scenario.
    pub async fn submit(
        &self,
        kind: ResourceKind,
        namespace: &str,
        id: &str,
        template: &Path,
        budget: &PollBudget,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle, Error> {
        let source = tokio::fs::read_to_string(template).await.map_err(|e| {
            Error::template(template.display().to_string(), format!("failed to read: {e}"))
        })?;
        let prepared = self.render(kind, namespace, id, &source, template)?;
        self.create(&prepared, namespace, id, budget, cancel).await?;

        let handle = ResourceHandle::new(kind, namespace, id);
        info!(resource = %handle, template = %template.display(), "Submitted");
        Ok(handle)
    }

    /// Render a template into a typed resource named `id` in `namespace`.
    ///
    /// The name, namespace and (for a BuildRun) the Build reference are
    /// always overwritten, so a template cannot point a scenario at some
    /// other scenario's resources.
    pub fn render(
        &self,
        kind: ResourceKind,
        namespace: &str,
        id: &str,
        source: &str,
        origin: &Path,
    ) -> Result<PreparedResource, Error> {
        let fail = |msg: String| {
            Error::submission(kind.as_str(), id, format!("{}: {msg}", origin.display()))
        };

        let rendered = self
            .engine
            .render(source, &TemplateContext::for_resource(id, namespace))
            .map_err(|e| fail(e.to_string()))?;
        let value = parse_yaml(&rendered).map_err(|e| fail(format!("invalid YAML: {e}")))?;

        let declared = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
        if declared != kind.as_str() {
            return Err(fail(format!(
                "template declares kind {declared:?}, expected {:?}",
                kind.as_str()
            )));
        }

        let prepared = match kind {
            ResourceKind::Build => {
                let mut build: Build =
                    serde_json::from_value(value).map_err(|e| fail(e.to_string()))?;
                build.metadata.name = Some(id.to_string());
                build.metadata.namespace = Some(namespace.to_string());
                build.metadata.resource_version = None;
                build.metadata.uid = None;
                build.status = None;
                PreparedResource::Build(build)
            }
            ResourceKind::BuildRun => {
                let mut run: BuildRun =
                    serde_json::from_value(value).map_err(|e| fail(e.to_string()))?;
                run.metadata.name = Some(id.to_string());
                run.metadata.namespace = Some(namespace.to_string());
                run.metadata.resource_version = None;
                run.metadata.uid = None;
                run.spec.build_ref.name = id.to_string();
                run.status = None;
                PreparedResource::BuildRun(run)
            }
        };
        Ok(prepared)
    }

    async fn create(
        &self,
        prepared: &PreparedResource,
        namespace: &str,
        id: &str,
        budget: &PollBudget,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let kind = prepared.kind();
        let resource = format!("create {kind} {namespace}/{id}");
        // Set once a create may have reached storage without us seeing the
        // response. A later 409 then means that create landed. Rejections
        // such as throttling never set it.
        let maybe_landed = Arc::new(AtomicBool::new(false));
        let platform = self.platform.as_ref();

        let result = poll_until(&resource, budget, cancel, || {
            let maybe_landed = maybe_landed.clone();
            async move {
                let outcome = match prepared {
                    PreparedResource::Build(build) => platform.create_build(namespace, build).await,
                    PreparedResource::BuildRun(run) => {
                        platform.create_build_run(namespace, run).await
                    }
                };
                match outcome {
                    Ok(()) => Ok(Observation::Ready(())),
                    Err(e) if e.is_already_exists() && maybe_landed.load(Ordering::SeqCst) => {
                        debug!(kind = %kind, name = id, "Earlier create attempt landed");
                        Ok(Observation::Ready(()))
                    }
                    Err(e) if e.is_already_exists() => Err(Error::submission(
                        kind.as_str(),
                        id,
                        format!("name already in use: {e}"),
                    )),
                    Err(e) if e.is_transient() => {
                        warn!(kind = %kind, name = id, error = %e, "Create failed transiently, retrying");
                        if e.may_have_landed() {
                            maybe_landed.store(true, Ordering::SeqCst);
                        }
                        Err(Error::submission_transient(kind.as_str(), id, e.to_string()))
                    }
                    Err(e) => Err(Error::submission(kind.as_str(), id, e.to_string())),
                }
            }
        })
        .await;

        match result {
            Err(Error::Timeout {
                waited,
                last_error,
                ..
            }) => Err(Error::submission_transient(
                kind.as_str(),
                id,
                format!(
                    "still failing after {waited:?}: {}",
                    last_error.unwrap_or_else(|| "no response".to_string())
                ),
            )),
            other => other,
        }
    }

    /// Delete a submitted resource
    pub async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        self.platform.delete_resource(handle).await?;
        debug!(resource = %handle, "Deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBuildPlatform;
    use kube::core::ErrorResponse;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;

    const BUILD_TEMPLATE: &str = r#"
apiVersion: shipwright.io/v1alpha1
kind: Build
metadata:
  name: placeholder
spec:
  source:
    url: https://github.com/shipwright-io/sample-go
    contextDir: docker-build
  strategy:
    name: kaniko
    kind: ClusterBuildStrategy
  dockerfile: Dockerfile
  output:
    image: image-registry.openshift-image-registry.svc:5000/build-examples/${id}
"#;

    const BUILDRUN_TEMPLATE: &str = r#"
apiVersion: shipwright.io/v1alpha1
kind: BuildRun
metadata:
  name: ${id}
spec:
  buildRef:
    name: something-else
  serviceAccount:
    generate: true
"#;

    fn api_error(code: u16, reason: &str, message: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    fn budget() -> PollBudget {
        PollBudget::from_secs(30, 1).unwrap()
    }

    fn origin() -> PathBuf {
        PathBuf::from("build/build_kaniko_cr.yaml")
    }

    fn submitter(mock: MockBuildPlatform) -> Submitter {
        Submitter::new(Arc::new(mock)).unwrap()
    }

    #[test]
    fn render_names_build_after_identifier() {
        let s = submitter(MockBuildPlatform::new());
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        let PreparedResource::Build(build) = prepared else {
            panic!("expected a Build");
        };
        assert_eq!(build.metadata.name.as_deref(), Some("kaniko-abcde"));
        assert_eq!(build.metadata.namespace.as_deref(), Some("e2e"));
        assert_eq!(build.spec.strategy.name, "kaniko");
        assert!(build.spec.output.image.ends_with("/kaniko-abcde"));
    }

    #[test]
    fn render_points_buildrun_at_its_build() {
        let s = submitter(MockBuildPlatform::new());
        let prepared = s
            .render(ResourceKind::BuildRun, "e2e", "kaniko-abcde", BUILDRUN_TEMPLATE, &origin())
            .unwrap();
        let PreparedResource::BuildRun(run) = prepared else {
            panic!("expected a BuildRun");
        };
        assert_eq!(run.metadata.name.as_deref(), Some("kaniko-abcde"));
        assert_eq!(run.spec.build_ref.name, "kaniko-abcde");
        assert!(run.generates_service_account());
    }

    #[test]
    fn render_rejects_wrong_kind() {
        let s = submitter(MockBuildPlatform::new());
        let err = s
            .render(ResourceKind::BuildRun, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap_err();
        assert!(matches!(err, Error::Submission { retryable: false, .. }));
        assert!(err.to_string().contains("expected \"BuildRun\""));
    }

    #[test]
    fn render_rejects_undefined_variables() {
        let s = submitter(MockBuildPlatform::new());
        let err = s
            .render(
                ResourceKind::Build,
                "e2e",
                "kaniko-abcde",
                "kind: Build\nmetadata:\n  name: ${name}\n",
                &origin(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn missing_template_is_fatal() {
        let s = submitter(MockBuildPlatform::new());
        let err = s
            .submit(
                ResourceKind::Build,
                "e2e",
                "kaniko-abcde",
                Path::new("/nonexistent/build.yaml"),
                &budget(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_creates_build_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BUILD_TEMPLATE.as_bytes()).unwrap();

        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build().times(1).returning(|ns, build| {
            assert_eq!(ns, "e2e");
            assert_eq!(build.metadata.name.as_deref(), Some("s2i-zzzzz"));
            Ok(())
        });

        let handle = submitter(mock)
            .submit(
                ResourceKind::Build,
                "e2e",
                "s2i-zzzzz",
                file.path(),
                &budget(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(handle, ResourceHandle::new(ResourceKind::Build, "e2e", "s2i-zzzzz"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_while_namespace_initializes() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build_run().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(api_error(
                    403,
                    "Forbidden",
                    "unable to create new content in namespace e2e because it is being initialized",
                ))
            } else {
                Ok(())
            }
        });

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::BuildRun, "e2e", "kaniko-abcde", BUILDRUN_TEMPLATE, &origin())
            .unwrap();
        s.create(&prepared, "e2e", "kaniko-abcde", &budget(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_after_transient_failure_counts_as_created() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build().returning(move |_, _| {
            match c.fetch_add(1, Ordering::SeqCst) {
                0 => Err(api_error(504, "Timeout", "gateway timeout")),
                _ => Err(api_error(409, "AlreadyExists", "builds \"kaniko-abcde\" already exists")),
            }
        });

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        s.create(&prepared, "e2e", "kaniko-abcde", &budget(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_after_throttling_is_a_naming_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build().returning(move |_, _| {
            match c.fetch_add(1, Ordering::SeqCst) {
                0 => Err(api_error(429, "TooManyRequests", "rate limited")),
                1 => Err(api_error(
                    403,
                    "Forbidden",
                    "unable to create new content in namespace e2e because it is being initialized",
                )),
                _ => Err(api_error(409, "AlreadyExists", "builds \"kaniko-abcde\" already exists")),
            }
        });

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        let err = s
            .create(&prepared, "e2e", "kaniko-abcde", &budget(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission { retryable: false, .. }));
        assert!(err.to_string().contains("name already in use"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_conflict_is_a_naming_failure() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build()
            .times(1)
            .returning(|_, _| Err(api_error(409, "AlreadyExists", "already exists")));

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        let err = s
            .create(&prepared, "e2e", "kaniko-abcde", &budget(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission { retryable: false, .. }));
        assert!(err.to_string().contains("name already in use"));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_failure_gives_up_at_budget() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build()
            .returning(|_, _| Err(api_error(503, "ServiceUnavailable", "etcd leader changed")));

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        let err = s
            .create(
                &prepared,
                "e2e",
                "kaniko-abcde",
                &PollBudget::from_secs(5, 1).unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission { retryable: true, .. }));
        assert!(err.to_string().contains("etcd leader changed"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_create_is_not_retried() {
        let mut mock = MockBuildPlatform::new();
        mock.expect_create_build().times(1).returning(|_, _| {
            Err(api_error(422, "Invalid", "spec.strategy.name: Required value"))
        });

        let s = submitter(mock);
        let prepared = s
            .render(ResourceKind::Build, "e2e", "kaniko-abcde", BUILD_TEMPLATE, &origin())
            .unwrap();
        let err = s
            .create(&prepared, "e2e", "kaniko-abcde", &budget(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
