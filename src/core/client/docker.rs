//! Execution backend talking to a local container engine daemon.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, DeviceRequest, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptions, CreateImageOptionsBuilder, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, error, info};

use crate::config::{AlgorithmDescriptor, StagingProtocol};
use crate::core::client::{
    command, cuda_available, error::BackendError, resolve_additional_files, resolve_device_requests,
    ExecutionBackend,
};
use crate::core::validation;
use crate::types::{DeviceConfig, GpuRequest, NameMap};
use crate::utils::constants::{
    MLCUBE_ADDITIONAL_FILES_MOUNT, MLCUBE_INPUT_MOUNT, MLCUBE_OUTPUT_MOUNT, MLCUBE_PARAMETERS_MOUNT,
};

#[derive(Debug, Default)]
pub struct DockerBackend;

impl DockerBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Ensures the image is available locally, pulling it with streamed progress
/// when the daemon does not know it yet.
pub(crate) async fn ensure_image(docker: &Docker, image: &str) -> Result<(), BackendError> {
    match docker.inspect_image(image).await {
        Ok(_) => return Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
        Err(e) => return Err(e.into()),
    }

    info!("pulling image {image}");
    let options = CreateImageOptionsBuilder::default().from_image(image).build();
    let mut pull = docker.create_image(Some(options), None, None);
    while let Some(line) = pull.next().await {
        let line = line?;
        if let Some(status) = line.status {
            debug!("{status} {}", line.progress.unwrap_or_default());
        }
    }
    Ok(())
}

/// Working directory baked into the image configuration, needed by the
/// sandbox backend to start containers in the right location.
pub(crate) async fn image_working_dir(docker: &Docker, image: &str) -> Result<Option<String>, BackendError> {
    ensure_image(docker, image).await?;
    let inspection = docker.inspect_image(image).await?;
    Ok(inspection.config.and_then(|config| config.working_dir).filter(|dir| !dir.is_empty()))
}

fn device_requests(gpu: Option<GpuRequest>) -> Option<Vec<DeviceRequest>> {
    gpu.map(|request| {
        vec![DeviceRequest {
            device_ids: Some(request.device_ids),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    })
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    async fn run<'a>(
        &self,
        descriptor: &AlgorithmDescriptor,
        input_dir: &Path,
        output_dir: &Path,
        device: &DeviceConfig,
        name_map: Option<&'a NameMap>,
    ) -> Result<String, BackendError> {
        command::log_algorithm_banner(descriptor);

        let docker = Docker::connect_with_local_defaults()?;
        ensure_image(&docker, &descriptor.run_args.docker_image).await?;

        let additional_files = resolve_additional_files(descriptor).await?;
        std::fs::create_dir_all(output_dir)?;

        let gpu = resolve_device_requests(
            cuda_available().await,
            device.force_cpu,
            descriptor.run_args.cpu_compatible,
            &device.cuda_devices,
        )?;
        debug!("GPU device requests: {gpu:?}");

        let user = command::container_user(descriptor).await;
        debug!("container user: {}", user.as_deref().unwrap_or("root (required by algorithm)"));

        let mappings = command::volume_mappings(descriptor, input_dir, &additional_files, output_dir);
        debug!("volume mappings: {mappings:?}");

        let cmd = match descriptor.staging_protocol() {
            StagingProtocol::Legacy => {
                let mut args = vec!["infer".to_string()];
                args.extend(command::build_command_args(
                    descriptor,
                    MLCUBE_INPUT_MOUNT,
                    MLCUBE_ADDITIONAL_FILES_MOUNT,
                    MLCUBE_OUTPUT_MOUNT,
                    MLCUBE_PARAMETERS_MOUNT,
                ));
                debug!("command args: {}", args.join(" "));
                Some(args)
            }
            StagingProtocol::Modern => None,
        };

        let host_config = HostConfig {
            binds: Some(mappings.iter().map(command::VolumeMapping::bind).collect()),
            device_requests: device_requests(gpu),
            network_mode: Some("none".to_string()),
            auto_remove: Some(true),
            shm_size: descriptor.shm_size_bytes(),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(descriptor.run_args.docker_image.clone()),
            cmd,
            user,
            host_config: Some(host_config),
            ..Default::default()
        };

        info!("starting inference");
        let started = Instant::now();

        let container = docker.create_container(None::<CreateContainerOptions>, body).await?;
        let attach_options =
            AttachContainerOptionsBuilder::default().stream(true).stdout(true).stderr(true).logs(true).build();
        let attached = docker.attach_container(&container.id, Some(attach_options)).await?;
        docker.start_container(&container.id, None::<StartContainerOptions>).await?;

        let log_future = async {
            let mut log = String::new();
            let mut output = attached.output;
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(line) => log.push_str(&String::from_utf8_lossy(&line.into_bytes())),
                    Err(e) => {
                        debug!("container log stream ended: {e}");
                        break;
                    }
                }
            }
            log
        };
        let wait_future = async {
            let mut wait = docker.wait_container(&container.id, None::<WaitContainerOptions>);
            match wait.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                // auto-remove can reap the container before the wait call
                // lands; the sanity check below still catches bad runs
                Some(Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })) | None => Ok(0),
                Some(Err(e)) => Err(BackendError::from(e)),
            }
        };
        let (status, container_log) = futures::join!(wait_future, log_future);
        let status = status?;

        if status != 0 {
            error!(">> {container_log}");
            return Err(BackendError::ContainerFailed { status, log: container_log });
        }

        validation::sanity_check_output(input_dir, output_dir, &container_log, name_map)?;
        debug!("container output: \n{container_log}");
        info!("finished inference in {:.2} seconds", started.elapsed().as_secs_f64());
        Ok(container_log)
    }
}
