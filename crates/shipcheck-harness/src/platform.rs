//! Access to the build platform
//!
//! Everything the harness reads or writes on the cluster goes through
//! [`BuildPlatform`], so scenario logic can be unit tested against a mock
//! and run for real against [`KubePlatform`].

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use shipcheck_common::crd::{Build, BuildRun, Condition, CONDITION_SUCCEEDED};
use shipcheck_common::error::{is_not_found, Error};
use shipcheck_common::kube_utils::taskrun_api_resource;
use shipcheck_common::FIELD_MANAGER;

/// The two resource kinds a scenario submits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Build definition
    Build,
    /// One execution of a Build
    BuildRun,
}

impl ResourceKind {
    /// Kubernetes kind string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "Build",
            Self::BuildRun => "BuildRun",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a submitted resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Namespace the resource lives in
    pub namespace: String,
    /// Resource name
    pub name: String,
    /// Resource kind
    pub kind: ResourceKind,
}

impl ResourceHandle {
    /// Create a handle
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Summary of an execution-engine TaskRun
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRunSummary {
    /// TaskRun name
    pub name: String,
    /// Its `Succeeded` condition, if any
    pub succeeded: Option<Condition>,
    /// Pod running the task, if scheduled
    pub pod_name: Option<String>,
}

/// Summary of a pod
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodSummary {
    /// Pod name
    pub name: String,
    /// Pod phase (Pending, Running, Succeeded, Failed, Unknown)
    pub phase: String,
    /// Init containers followed by regular containers, in spec order
    pub containers: Vec<String>,
}

/// Operations the harness needs from the build platform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuildPlatform: Send + Sync {
    /// Create a Build
    ///
    /// Errors are returned as [`Error::Kube`] so callers can tell a 409
    /// conflict from other failures.
    async fn create_build(&self, namespace: &str, build: &Build) -> Result<(), Error>;

    /// Create a BuildRun, with the same error contract as `create_build`
    async fn create_build_run(&self, namespace: &str, build_run: &BuildRun) -> Result<(), Error>;

    /// Get a BuildRun, `None` if it does not exist
    async fn get_build_run(&self, namespace: &str, name: &str) -> Result<Option<BuildRun>, Error>;

    /// Delete a submitted resource; deleting something already gone succeeds
    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), Error>;

    /// Whether a ServiceAccount exists
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Names of ServiceAccounts matching a label selector
    async fn list_service_accounts(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, Error>;

    /// TaskRuns matching a label selector
    async fn list_task_runs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<TaskRunSummary>, Error>;

    /// Pods matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<PodSummary>, Error>;

    /// Last `tail_lines` lines of one container's log
    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, Error>;
}

/// [`BuildPlatform`] backed by a Kubernetes API server
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    /// Wrap a connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn create<K>(&self, namespace: &str, resource: &K) -> Result<(), Error>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, resource).await?;
        Ok(())
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace, name, "resource already deleted");
                Ok(())
            }
            Err(e) => Err(Error::platform("delete", &e)),
        }
    }
}

#[async_trait]
impl BuildPlatform for KubePlatform {
    async fn create_build(&self, namespace: &str, build: &Build) -> Result<(), Error> {
        self.create(namespace, build).await
    }

    async fn create_build_run(&self, namespace: &str, build_run: &BuildRun) -> Result<(), Error> {
        self.create(namespace, build_run).await
    }

    async fn get_build_run(&self, namespace: &str, name: &str) -> Result<Option<BuildRun>, Error> {
        let api: Api<BuildRun> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::platform("get-buildrun", &e))
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), Error> {
        match handle.kind {
            ResourceKind::Build => self.delete::<Build>(&handle.namespace, &handle.name).await,
            ResourceKind::BuildRun => {
                self.delete::<BuildRun>(&handle.namespace, &handle.name)
                    .await
            }
        }
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| Error::platform("get-serviceaccount", &e))?;
        Ok(found.is_some())
    }

    async fn list_service_accounts(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::platform("list-serviceaccounts", &e))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|sa| sa.metadata.name)
            .collect())
    }

    async fn list_task_runs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<TaskRunSummary>, Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &taskrun_api_resource());
        let list = match api.list(&ListParams::default().labels(label_selector)).await {
            Ok(list) => list,
            // The execution engine's CRDs are not installed
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(Error::platform("list-taskruns", &e)),
        };
        Ok(list.items.iter().map(task_run_summary).collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodSummary>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::platform("list-pods", &e))?;
        Ok(list.items.iter().map(pod_summary).collect())
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        api.logs(pod, &params)
            .await
            .map_err(|e| Error::platform("pod-logs", &e))
    }
}

fn task_run_summary(obj: &DynamicObject) -> TaskRunSummary {
    let status = obj.data.get("status");
    let succeeded = status
        .and_then(|s| s.get("conditions"))
        .and_then(|c| serde_json::from_value::<Vec<Condition>>(c.clone()).ok())
        .and_then(|conditions| {
            conditions
                .into_iter()
                .find(|c| c.type_ == CONDITION_SUCCEEDED)
        });
    let pod_name = status
        .and_then(|s| s.get("podName"))
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    TaskRunSummary {
        name: obj.metadata.name.clone().unwrap_or_default(),
        succeeded,
        pod_name,
    }
}

fn pod_summary(pod: &Pod) -> PodSummary {
    let spec = pod.spec.as_ref();
    let init = spec
        .and_then(|s| s.init_containers.as_ref())
        .into_iter()
        .flatten();
    let regular = spec.map(|s| s.containers.iter()).into_iter().flatten();

    PodSummary {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        containers: init.chain(regular).map(|c| c.name.clone()).collect(),
    }
}
