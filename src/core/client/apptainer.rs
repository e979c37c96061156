//! Execution backend running algorithms through the Apptainer CLI: the
//! container image is materialized once as a writable sandbox under the
//! system temp directory, and every run gets a throwaway overlay image so
//! algorithms that write inside the container still work.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use bollard::Docker;
use tracing::{debug, error, info, warn};

use crate::config::{AlgorithmDescriptor, StagingProtocol};
use crate::core::client::{
    command, cuda_available, docker, error::BackendError, resolve_additional_files, resolve_device_requests,
    ExecutionBackend,
};
use crate::core::validation;
use crate::types::{ApptainerSettings, DeviceConfig, NameMap};
use crate::utils::constants::{
    MLCUBE_ADDITIONAL_FILES_MOUNT, MLCUBE_INPUT_MOUNT, MLCUBE_OUTPUT_MOUNT, MLCUBE_PARAMETERS_MOUNT,
};

#[derive(Debug)]
pub struct ApptainerBackend {
    settings: ApptainerSettings,
}

impl ApptainerBackend {
    pub fn new(settings: ApptainerSettings) -> Result<Self, BackendError> {
        if settings.overlay_size_mib == 0 {
            return Err(BackendError::InvalidOverlaySize);
        }
        Ok(Self { settings })
    }

    /// Sandbox location for an image ref, keyed by the repository path so
    /// repeated runs of the same algorithm reuse the converted image.
    fn sandbox_path(image: &str) -> PathBuf {
        let repository = image.split(':').next().unwrap_or(image);
        std::env::temp_dir().join(repository)
    }

    /// Builds the sandbox from the container registry if it is not cached
    /// yet.
    async fn ensure_sandbox(image: &str) -> Result<PathBuf, BackendError> {
        let sandbox = Self::sandbox_path(image);
        if sandbox.exists() {
            return Ok(sandbox);
        }
        if let Some(parent) = sandbox.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("pulling image {image} and creating a sandbox at {}", sandbox.display());
        run_apptainer(&[
            "build".to_string(),
            "--sandbox".to_string(),
            "--fakeroot".to_string(),
            sandbox.display().to_string(),
            format!("docker://{image}"),
        ])
        .await?;
        Ok(sandbox)
    }

    /// Working directory configured in the container image; the sandbox does
    /// not preserve it, so it is read from the local container engine. Falls
    /// back to `/` with a warning when no engine is reachable.
    async fn working_dir(image: &str) -> String {
        let engine = match Docker::connect_with_local_defaults() {
            Ok(engine) => engine,
            Err(e) => {
                warn!("could not reach the container engine to inspect {image}, using / as workdir: {e}");
                return "/".to_string();
            }
        };
        match docker::image_working_dir(&engine, image).await {
            Ok(Some(dir)) => dir,
            Ok(None) => "/".to_string(),
            Err(e) => {
                warn!("could not inspect image {image}, using / as workdir: {e}");
                "/".to_string()
            }
        }
    }
}

async fn run_apptainer(args: &[String]) -> Result<std::process::Output, BackendError> {
    let output = tokio::process::Command::new("apptainer")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        return Err(BackendError::Sandbox(format!(
            "apptainer {} exited with {}: {}",
            args.first().map(String::as_str).unwrap_or(""),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

#[async_trait]
impl ExecutionBackend for ApptainerBackend {
    async fn run<'a>(
        &self,
        descriptor: &AlgorithmDescriptor,
        input_dir: &Path,
        output_dir: &Path,
        device: &DeviceConfig,
        name_map: Option<&'a NameMap>,
    ) -> Result<String, BackendError> {
        command::log_algorithm_banner(descriptor);

        let image = &descriptor.run_args.docker_image;
        let sandbox = Self::ensure_sandbox(image).await?;

        let additional_files = resolve_additional_files(descriptor).await?;
        debug!("additional files path: {}", additional_files.display());
        std::fs::create_dir_all(output_dir)?;

        let mappings = command::volume_mappings(descriptor, input_dir, &additional_files, output_dir);
        debug!("volume mappings: {mappings:?}");

        let args = match descriptor.staging_protocol() {
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
                args
            }
            StagingProtocol::Modern => Vec::new(),
        };

        let gpu = resolve_device_requests(
            cuda_available().await,
            device.force_cpu,
            descriptor.run_args.cpu_compatible,
            &device.cuda_devices,
        )?;
        debug!("GPU device requests: {gpu:?}");

        info!("starting inference");
        let started = Instant::now();

        let overlay = PathBuf::from(format!("{}_overlay.img", sandbox.display()));
        let created_overlay = !overlay.exists();
        if created_overlay {
            run_apptainer(&[
                "overlay".to_string(),
                "create".to_string(),
                "--size".to_string(),
                self.settings.overlay_size_mib.to_string(),
                overlay.display().to_string(),
            ])
            .await?;
        }

        let mut run_args = vec!["run".to_string()];
        if gpu.is_some() {
            info!("using CUDA devices: {}", device.cuda_devices);
            run_args.push("--nv".to_string());
        }
        run_args.push("--cwd".to_string());
        run_args.push(Self::working_dir(image).await);
        run_args.push("--overlay".to_string());
        run_args.push(overlay.display().to_string());
        for mapping in &mappings {
            run_args.push("--bind".to_string());
            run_args.push(mapping.bind());
        }
        run_args.push(sandbox.display().to_string());
        run_args.extend(args);

        let result = run_apptainer(&run_args).await;
        if created_overlay {
            if let Err(e) = std::fs::remove_file(&overlay) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove overlay image {}: {e}", overlay.display());
                }
            }
        }
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!("sandbox run failed: {e}");
                return Err(e);
            }
        };

        let mut container_log = String::from_utf8_lossy(&output.stdout).to_string();
        container_log.push_str(&String::from_utf8_lossy(&output.stderr));

        validation::sanity_check_output(input_dir, output_dir, &container_log, name_map)?;
        info!("finished inference in {:.2} seconds", started.elapsed().as_secs_f64());
        Ok(container_log)
    }
}
