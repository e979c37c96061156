//! Thin cluster API wrapper. The backend talks to the cluster exclusively
//! through the [`ClusterClient`] trait so the orchestration protocol can be
//! tested against a mock without a live cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{AttachParams, DeleteParams, ListParams, LogParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::core::client::error::BackendError;
use crate::utils::constants::JOB_CONTAINER;

/// Pod state snapshot used by the polling loops.
#[derive(Clone, Debug, Default)]
pub struct PodObservation {
    pub phase: String,
    pub init_running: bool,
    pub main_running: bool,
}

impl PodObservation {
    pub fn is_terminal(&self) -> bool {
        self.phase == "Succeeded" || self.phase == "Failed"
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pvc_names(&self, namespace: &str) -> Result<Vec<String>, BackendError>;
    async fn create_pvc(
        &self,
        namespace: &str,
        name: &str,
        storage_size: &str,
        storage_class: Option<String>,
    ) -> Result<(), BackendError>;
    async fn list_job_names(&self, namespace: &str) -> Result<Vec<String>, BackendError>;
    async fn create_job(&self, namespace: &str, job: Job) -> Result<(), BackendError>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
    /// Names of the pods belonging to a job, oldest first.
    async fn pods_for_job(&self, namespace: &str, job_name: &str) -> Result<Vec<String>, BackendError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
    async fn observe_pod(&self, namespace: &str, name: &str) -> Result<PodObservation, BackendError>;
    /// Follows a container's log until the container ends, returning the full
    /// text.
    async fn follow_logs(&self, namespace: &str, pod: &str, container: &str)
        -> Result<String, BackendError>;
    /// Runs a command in a container, optionally feeding bytes to its stdin,
    /// and returns combined stdout/stderr.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<String, BackendError>;
}

/// [`ClusterClient`] backed by the ambient kubeconfig.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub async fn connect() -> Result<Self, BackendError> {
        Ok(Self { client: Client::try_default().await? })
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_pvc_names(&self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let claims = self.pvcs(namespace).list(&ListParams::default()).await?;
        Ok(claims.items.into_iter().filter_map(|claim| claim.metadata.name).collect())
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        name: &str,
        storage_size: &str,
        storage_class: Option<String>,
    ) -> Result<(), BackendError> {
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(storage_size.to_string()),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: storage_class,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.pvcs(namespace).create(&PostParams::default(), &claim).await?;
        Ok(())
    }

    async fn list_job_names(&self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let jobs = self.jobs(namespace).list(&ListParams::default()).await?;
        Ok(jobs.items.into_iter().filter_map(|job| job.metadata.name).collect())
    }

    async fn create_job(&self, namespace: &str, job: Job) -> Result<(), BackendError> {
        self.jobs(namespace).create(&PostParams::default(), &job).await?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.jobs(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn pods_for_job(&self, namespace: &str, job_name: &str) -> Result<Vec<String>, BackendError> {
        let selector = format!("job-name={job_name}");
        let pods = self.pods(namespace).list(&ListParams::default().labels(&selector)).await?;
        let mut named: Vec<_> = pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let created = pod.metadata.creation_timestamp.clone();
                pod.metadata.name.map(|name| (created, name))
            })
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named.into_iter().map(|(_, name)| name).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.pods(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn observe_pod(&self, namespace: &str, name: &str) -> Result<PodObservation, BackendError> {
        let pod = self.pods(namespace).get(name).await?;
        let status = pod.status.unwrap_or_default();
        let running = |state: &Option<k8s_openapi::api::core::v1::ContainerState>| {
            state.as_ref().is_some_and(|s| s.running.is_some())
        };
        Ok(PodObservation {
            phase: status.phase.unwrap_or_default(),
            init_running: status.init_container_statuses.iter().flatten().any(|s| running(&s.state)),
            main_running: status
                .container_statuses
                .iter()
                .flatten()
                .any(|s| s.name == JOB_CONTAINER && running(&s.state)),
        })
    }

    async fn follow_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, BackendError> {
        let params = LogParams { container: Some(container.to_string()), follow: true, ..Default::default() };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<String, BackendError> {
        let params = AttachParams::default()
            .container(container.to_string())
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);
        let mut attached = self.pods(namespace).exec(pod, command.to_vec(), &params).await?;

        if let Some(bytes) = stdin {
            if let Some(mut writer) = attached.stdin() {
                writer.write_all(&bytes).await?;
                writer.shutdown().await?;
            }
        }

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let stdout_fut = async move {
            let mut buf = Vec::new();
            if let Some(mut reader) = stdout {
                let _ = AsyncReadExt::read_to_end(&mut reader, &mut buf).await;
            }
            buf
        };
        let stderr_fut = async move {
            let mut buf = Vec::new();
            if let Some(mut reader) = stderr {
                let _ = AsyncReadExt::read_to_end(&mut reader, &mut buf).await;
            }
            buf
        };
        let (out, err) = futures::join!(stdout_fut, stderr_fut);
        let _ = attached.join().await;

        let mut output = String::from_utf8_lossy(&out).to_string();
        output.push_str(&String::from_utf8_lossy(&err));
        debug!("command {command:?} executed in pod '{pod}' ({namespace}):\n{output}");
        Ok(output)
    }
}
