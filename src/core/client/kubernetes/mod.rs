//! Execution backend submitting algorithm runs as cluster jobs. Input data
//! lives on a persistent volume claim; an init container blocked on a
//! sentinel file holds the job back until the client has verified (and where
//! needed uploaded) the staged files, and a throwaway finalizer job exposes
//! the produced outputs for download after the run.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactError, ZenodoClient};
use crate::config::{AlgorithmDescriptor, StagingProtocol};
use crate::core::client::{
    command, cuda_available, error::BackendError, resolve_device_requests, ExecutionBackend,
};
use crate::core::validation;
use crate::types::{DeviceConfig, KubernetesSettings, NameMap, RetryPolicy};
use crate::utils::constants::{
    parameters_dir, FINALIZER_CONTAINER, INIT_CONTAINER, INIT_IMAGE, INPUT_MOUNT, JOB_CONTAINER,
    OUTPUT_MOUNT, SENTINEL_FILE,
};

pub mod cluster;

pub use cluster::{ClusterClient, KubeClusterClient, PodObservation};

pub struct KubernetesBackend {
    settings: KubernetesSettings,
    cluster: Option<Arc<dyn ClusterClient>>,
}

impl KubernetesBackend {
    pub fn new(settings: KubernetesSettings) -> Self {
        Self { settings, cluster: None }
    }

    /// Injects a cluster client instead of connecting through the ambient
    /// kubeconfig.
    pub fn with_cluster(settings: KubernetesSettings, cluster: Arc<dyn ClusterClient>) -> Self {
        Self { settings, cluster: Some(cluster) }
    }

    async fn cluster(&self) -> Result<Arc<dyn ClusterClient>, BackendError> {
        match &self.cluster {
            Some(cluster) => Ok(cluster.clone()),
            None => Ok(Arc::new(KubeClusterClient::connect().await?)),
        }
    }
}

fn random_name(kind: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("brats-{}-{kind}", &id[..12])
}

/// Creates the claim unless one with the same name already exists in the
/// namespace. A pre-existing claim is assumed to already hold staged data.
pub(crate) async fn ensure_pvc(
    cluster: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    storage_size: &str,
    storage_class: Option<&str>,
) -> Result<(), BackendError> {
    if cluster.list_pvc_names(namespace).await?.iter().any(|existing| existing == name) {
        debug!("claim '{name}' already exists in namespace '{namespace}', skipping creation");
        return Ok(());
    }
    cluster.create_pvc(namespace, name, storage_size, storage_class.map(str::to_string)).await
}

fn sentinel_wait_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("while [ ! -f {SENTINEL_FILE} ]; do sleep 1; done"),
    ]
}

fn gpu_resources() -> ResourceRequirements {
    let one = BTreeMap::from([("nvidia.com/gpu".to_string(), Quantity("1".to_string()))]);
    ResourceRequirements { requests: Some(one.clone()), limits: Some(one), ..Default::default() }
}

fn claim_volumes(pv_mounts: &[(String, String)]) -> (Vec<Volume>, Vec<VolumeMount>) {
    let volumes = pv_mounts
        .iter()
        .map(|(claim, _)| Volume {
            name: claim.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    let mounts = pv_mounts
        .iter()
        .map(|(claim, path)| VolumeMount {
            name: claim.clone(),
            mount_path: path.clone(),
            ..Default::default()
        })
        .collect();
    (volumes, mounts)
}

fn pod_template(volumes: Vec<Volume>, init_containers: Option<Vec<Container>>, containers: Vec<Container>) -> PodTemplateSpec {
    PodTemplateSpec {
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            volumes: Some(volumes),
            init_containers,
            containers,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The inference job: the algorithm container plus an init container that
/// waits for the sentinel file so staging can complete first.
fn job_resource(
    job_name: &str,
    pv_mounts: &[(String, String)],
    image: &str,
    gpu: bool,
    args: Option<Vec<String>>,
    shm_quantity: Option<String>,
) -> Job {
    let (mut volumes, mut volume_mounts) = claim_volumes(pv_mounts);

    let init_container = Container {
        name: INIT_CONTAINER.to_string(),
        image: Some(INIT_IMAGE.to_string()),
        command: Some(sentinel_wait_command()),
        volume_mounts: Some(volume_mounts.clone()),
        ..Default::default()
    };

    if let Some(quantity) = shm_quantity {
        volumes.push(Volume {
            name: "shm".to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(Quantity(quantity)),
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "shm".to_string(),
            mount_path: "/dev/shm".to_string(),
            ..Default::default()
        });
    }

    let main_container = Container {
        name: JOB_CONTAINER.to_string(),
        image: Some(image.to_string()),
        args,
        volume_mounts: Some(volume_mounts),
        resources: gpu.then(gpu_resources),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta { name: Some(job_name.to_string()), ..Default::default() },
        spec: Some(JobSpec {
            template: pod_template(volumes, Some(vec![init_container]), vec![main_container]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Throwaway job that mounts the output claim and idles on the sentinel so
/// produced files can be pulled out of its pod.
fn finalizer_job_resource(job_name: &str, pvc_name: &str, mount_path: &str) -> Job {
    let mounts = [(pvc_name.to_string(), mount_path.to_string())];
    let (volumes, volume_mounts) = claim_volumes(&mounts);
    let container = Container {
        name: FINALIZER_CONTAINER.to_string(),
        image: Some(INIT_IMAGE.to_string()),
        command: Some(sentinel_wait_command()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };
    Job {
        metadata: ObjectMeta { name: Some(job_name.to_string()), ..Default::default() },
        spec: Some(JobSpec { template: pod_template(volumes, None, vec![container]), ..Default::default() }),
        ..Default::default()
    }
}

fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn tar_files(files: &[(PathBuf, PathBuf)]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, arcname) in files {
        builder.append_path_with_name(path, arcname)?;
    }
    builder.into_inner()
}

impl KubernetesBackend {
    /// Deletes any leftover job (and its pods) with the same name, creates
    /// the job and waits for its pod to appear.
    async fn create_job_and_find_pod(
        &self,
        cluster: &dyn ClusterClient,
        job_name: &str,
        job: Job,
    ) -> Result<String, BackendError> {
        let namespace = &self.settings.namespace;
        if cluster.list_job_names(namespace).await?.iter().any(|existing| existing == job_name) {
            warn!("job '{job_name}' already exists in namespace '{namespace}', deleting it");
            cluster.delete_job(namespace, job_name).await?;
        }
        for pod in cluster.pods_for_job(namespace, job_name).await? {
            warn!("deleting pod '{pod}' in namespace '{namespace}' associated with job '{job_name}'");
            if let Err(e) = cluster.delete_pod(namespace, &pod).await {
                error!("failed to delete pod '{pod}' in namespace '{namespace}': {e}");
            }
        }

        cluster.create_job(namespace, job).await?;

        let policy = RetryPolicy::new(60, self.settings.poll.interval);
        for _ in 0..policy.max_attempts {
            if let Some(pod) = cluster.pods_for_job(namespace, job_name).await?.pop() {
                return Ok(pod);
            }
            policy.wait().await;
        }
        Err(BackendError::PollTimeout { pod: job_name.to_string(), waited_secs: policy.budget().as_secs() })
    }

    /// Waits until the init container runs (staging can proceed) or the pod
    /// reached a phase that makes waiting pointless.
    async fn wait_pod_started(&self, cluster: &dyn ClusterClient, pod: &str) -> Result<(), BackendError> {
        let namespace = &self.settings.namespace;
        let policy = &self.settings.poll;
        for _ in 0..policy.max_attempts {
            let observed = cluster.observe_pod(namespace, pod).await?;
            if observed.init_running {
                info!("pod '{pod}' init container is running");
                return Ok(());
            }
            if observed.phase == "Running" {
                info!("pod '{pod}' is running");
                return Ok(());
            }
            if observed.is_terminal() {
                warn!("pod '{pod}' entered terminal phase: {}", observed.phase);
                return Ok(());
            }
            policy.wait().await;
        }
        Err(BackendError::PollTimeout { pod: pod.to_string(), waited_secs: policy.budget().as_secs() })
    }

    /// Follows the algorithm container's log once it is running. Log loss is
    /// never fatal; the run outcome is judged by the pod phase and the
    /// output sanity check.
    async fn observe_job_output(&self, cluster: &dyn ClusterClient, pod: &str) -> Result<String, BackendError> {
        let namespace = &self.settings.namespace;
        let policy = &self.settings.poll;
        let mut reached = false;
        for _ in 0..policy.max_attempts {
            let observed = cluster.observe_pod(namespace, pod).await?;
            if observed.phase == "Running" && observed.main_running {
                reached = true;
                break;
            }
            if observed.is_terminal() {
                warn!("pod '{pod}' entered terminal phase: {}", observed.phase);
                reached = true;
                break;
            }
            policy.wait().await;
        }
        if !reached {
            error!("timed out waiting for the main container in pod '{pod}' to be running");
            return Ok(String::new());
        }
        match cluster.follow_logs(namespace, pod, JOB_CONTAINER).await {
            Ok(log) => Ok(log),
            Err(e) => {
                error!("failed to fetch logs from pod '{pod}' in namespace '{namespace}': {e}");
                Ok(String::new())
            }
        }
    }

    async fn wait_pod_terminal(&self, cluster: &dyn ClusterClient, pod: &str) -> Result<String, BackendError> {
        let namespace = &self.settings.namespace;
        let policy = &self.settings.poll;
        for _ in 0..policy.max_attempts {
            let observed = cluster.observe_pod(namespace, pod).await?;
            if observed.is_terminal() {
                info!("pod '{pod}' finished with phase: {}", observed.phase);
                return Ok(observed.phase);
            }
            policy.wait().await;
        }
        Err(BackendError::PollTimeout { pod: pod.to_string(), waited_secs: policy.budget().as_secs() })
    }

    async fn upload_files(
        &self,
        cluster: &dyn ClusterClient,
        pod: &str,
        files: &[(PathBuf, PathBuf)],
        mount_path: &str,
    ) -> Result<(), BackendError> {
        let bytes = tar_files(files)?;
        let command = vec![
            "tar".to_string(),
            "xmf".to_string(),
            "-".to_string(),
            "-C".to_string(),
            mount_path.to_string(),
        ];
        cluster.exec(&self.settings.namespace, pod, INIT_CONTAINER, &command, Some(bytes)).await?;
        info!("files uploaded successfully to pod '{pod}'");
        Ok(())
    }

    /// Verifies every local input file is present on the claim, uploading the
    /// ones that are missing.
    async fn check_files_in_pod(
        &self,
        cluster: &dyn ClusterClient,
        pod: &str,
        local_root: &Path,
        mount_path: &str,
    ) -> Result<(), BackendError> {
        debug!("checking staged files in pod '{pod}' with mount path '{mount_path}'");
        for file in walk_files(local_root)? {
            let Ok(relative) = file.strip_prefix(local_root) else { continue };
            let remote = format!("{mount_path}/input/{}", relative.display());
            let command = vec!["ls".to_string(), "-la".to_string(), remote];
            let output = cluster.exec(&self.settings.namespace, pod, INIT_CONTAINER, &command, None).await?;
            if output.contains("No such file or directory") {
                warn!("file '{}' is not present in pod '{pod}', uploading it now", relative.display());
                let arcname = Path::new("input").join(relative);
                self.upload_files(cluster, pod, &[(file.clone(), arcname)], mount_path).await?;
            }
        }
        Ok(())
    }

    /// Downloads the record archive directly onto the claim from inside the
    /// init container, skipping the download when the versioned folder is
    /// already populated.
    async fn stage_additional_files(
        &self,
        cluster: &dyn ClusterClient,
        pod: &str,
        record_folder: &str,
        archive_url: &str,
    ) -> Result<(), BackendError> {
        let script = format!(
            "if [ ! -d {record_folder} ] || [ -z \"$(ls -A {record_folder})\" ]; then \
             mkdir -p {record_folder} && \
             wget -O {record_folder}/archive.zip {archive_url} && \
             apk add --no-cache unzip && \
             unzip {record_folder}/archive.zip -d {record_folder} && \
             rm {record_folder}/archive.zip && \
             for z in {record_folder}/*.zip; do \
               if [ -f \"$z\" ]; then unzip \"$z\" -d {record_folder} && rm \"$z\"; fi; \
             done; \
             else echo 'additional files already present in {record_folder}, skipping download.'; fi"
        );
        let command = vec!["sh".to_string(), "-c".to_string(), script];
        info!("downloading additional files to {record_folder}...");
        let output = cluster.exec(&self.settings.namespace, pod, INIT_CONTAINER, &command, None).await?;
        info!("additional files staged in pod '{pod}'");
        debug!("contents of {record_folder}:\n{output}");
        Ok(())
    }

    /// Streams the remote output folder out of the finalizer pod as a
    /// base64-encoded tar and unpacks it locally.
    async fn download_outputs(
        &self,
        cluster: &dyn ClusterClient,
        pod: &str,
        remote_folder: &str,
        output_dir: &Path,
    ) -> Result<(), BackendError> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("tar cf - -C {remote_folder} . | base64"),
        ];
        let encoded =
            cluster.exec(&self.settings.namespace, pod, FINALIZER_CONTAINER, &command, None).await?;
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
        tar::Archive::new(Cursor::new(bytes)).unpack(output_dir)?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionBackend for KubernetesBackend {
    async fn run<'a>(
        &self,
        descriptor: &AlgorithmDescriptor,
        input_dir: &Path,
        output_dir: &Path,
        device: &DeviceConfig,
        name_map: Option<&'a NameMap>,
    ) -> Result<String, BackendError> {
        let settings = &self.settings;
        let namespace = &settings.namespace;
        let pvc_name = settings.pvc_name.clone().unwrap_or_else(|| random_name("pvc"));
        let job_name = settings.job_name.clone().unwrap_or_else(|| random_name("job"));
        debug!("job name: {job_name}");
        debug!("claim name: {pvc_name}");

        let cluster = self.cluster().await?;
        ensure_pvc(
            cluster.as_ref(),
            namespace,
            &pvc_name,
            &settings.pvc_storage_size,
            settings.pvc_storage_class.as_deref(),
        )
        .await?;

        command::log_algorithm_banner(descriptor);

        let gpu = resolve_device_requests(
            cuda_available().await,
            device.force_cpu,
            descriptor.run_args.cpu_compatible,
            &device.cuda_devices,
        )?;
        debug!("GPU device requests: {gpu:?}");
        let user = command::container_user(descriptor).await;
        debug!("container user: {}", user.as_deref().unwrap_or("root (required by algorithm)"));

        let protocol = descriptor.staging_protocol();
        let data_mount;
        let output_mount;
        let mut pv_mounts = Vec::new();
        let mut args = None;
        let mut additional = None;
        let mut output_pvc_name = pvc_name.clone();

        match protocol {
            StagingProtocol::Legacy => {
                data_mount = settings.data_mount_path.clone();
                output_mount = format!("{data_mount}/output");
                if let Some(files) = &descriptor.additional_files {
                    let metadata =
                        ZenodoClient::new().fetch_metadata(&files.record_id).await.map_err(|e| {
                            error!(
                                "additional files for record '{}' could not be resolved from Zenodo: {e}",
                                files.record_id
                            );
                            BackendError::Artifact(ArtifactError::Unreachable(files.record_id.clone()))
                        })?;
                    let record_folder = format!("{data_mount}/{}_v{}", files.record_id, metadata.version);
                    additional = Some((record_folder, metadata.archive_url));
                }
                let mut command_args = vec!["infer".to_string()];
                command_args.extend(command::build_command_args(
                    descriptor,
                    &format!("{data_mount}/input"),
                    additional.as_ref().map(|(folder, _)| folder.as_str()).unwrap_or_default(),
                    &output_mount,
                    &format!("{data_mount}/parameters"),
                ));
                args = Some(command_args);
                pv_mounts.push((pvc_name.clone(), data_mount.clone()));
            }
            StagingProtocol::Modern => {
                data_mount = INPUT_MOUNT.to_string();
                output_mount = OUTPUT_MOUNT.to_string();
                output_pvc_name = format!("{pvc_name}-output");
                ensure_pvc(
                    cluster.as_ref(),
                    namespace,
                    &output_pvc_name,
                    &settings.pvc_storage_size,
                    settings.pvc_storage_class.as_deref(),
                )
                .await?;
                pv_mounts.push((pvc_name.clone(), data_mount.clone()));
                pv_mounts.push((output_pvc_name.clone(), output_mount.clone()));
            }
        }

        let job = job_resource(
            &job_name,
            &pv_mounts,
            &descriptor.run_args.docker_image,
            gpu.is_some(),
            args,
            Some(descriptor.shm_size_quantity()),
        );
        let pod_name = self.create_job_and_find_pod(cluster.as_ref(), &job_name, job).await?;
        debug!("pod name: {pod_name}");

        info!("waiting for pod '{pod_name}' to be running...");
        self.wait_pod_started(cluster.as_ref(), &pod_name).await?;

        self.check_files_in_pod(cluster.as_ref(), &pod_name, input_dir, &data_mount).await?;
        debug!("files checked successfully in pod '{pod_name}'");

        if protocol == StagingProtocol::Legacy {
            if let Some((record_folder, archive_url)) = &additional {
                self.stage_additional_files(cluster.as_ref(), &pod_name, record_folder, archive_url).await?;
            }
            let parameters: Vec<(PathBuf, PathBuf)> = walk_files(&parameters_dir())?
                .into_iter()
                .filter_map(|file| {
                    let name = file.file_name()?.to_owned();
                    Some((file.clone(), Path::new("parameters").join(name)))
                })
                .collect();
            self.upload_files(cluster.as_ref(), &pod_name, &parameters, &data_mount).await?;
        }

        let touch = vec!["touch".to_string(), SENTINEL_FILE.to_string()];
        cluster.exec(namespace, &pod_name, INIT_CONTAINER, &touch, None).await?;

        std::fs::create_dir_all(output_dir)?;

        info!("starting inference");
        let started = Instant::now();

        settings.poll.wait().await;
        let job_log = self.observe_job_output(cluster.as_ref(), &pod_name).await?;
        self.wait_pod_terminal(cluster.as_ref(), &pod_name).await?;

        let (finalizer_pvc, finalizer_mount, remote_output) = match protocol {
            StagingProtocol::Legacy => (pvc_name.clone(), data_mount.clone(), output_mount.clone()),
            StagingProtocol::Modern => (output_pvc_name.clone(), output_mount.clone(), output_mount.clone()),
        };
        let finalizer_name = format!("{job_name}-finalizer");
        let finalizer_job = finalizer_job_resource(&finalizer_name, &finalizer_pvc, &finalizer_mount);
        let finalizer_pod =
            self.create_job_and_find_pod(cluster.as_ref(), &finalizer_name, finalizer_job).await?;
        settings.poll.wait().await;

        self.download_outputs(cluster.as_ref(), &finalizer_pod, &remote_output, output_dir).await?;
        cluster.exec(namespace, &finalizer_pod, FINALIZER_CONTAINER, &touch, None).await?;

        validation::sanity_check_output(input_dir, output_dir, &job_log, name_map)?;
        debug!("job output: \n{job_log}");
        info!("finished inference in {:.2} seconds", started.elapsed().as_secs_f64());
        Ok(job_log)
    }
}
