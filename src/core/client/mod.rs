use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::artifacts::ZenodoClient;
use crate::config::AlgorithmDescriptor;
use crate::types::{Backend, DeviceConfig, GpuRequest, NameMap};

pub mod apptainer;
pub mod command;
pub mod docker;
pub mod error;
pub mod kubernetes;

pub use error::BackendError;

/// Common contract of the three execution environments: stage the prepared
/// input directory into a container running the algorithm image, block until
/// it finishes and return the captured container log. Implementations must
/// leave the produced files in `output_dir` and run the shared output sanity
/// check before reporting success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run<'a>(
        &self,
        descriptor: &AlgorithmDescriptor,
        input_dir: &Path,
        output_dir: &Path,
        device: &DeviceConfig,
        name_map: Option<&'a NameMap>,
    ) -> Result<String, BackendError>;
}

/// Instantiates the backend selected by caller configuration. Connection to
/// the underlying engine is deferred to `run` so construction never touches
/// the network.
pub fn build_backend(backend: Backend) -> Result<Arc<dyn ExecutionBackend>, BackendError> {
    Ok(match backend {
        Backend::Docker => Arc::new(docker::DockerBackend::new()),
        Backend::Apptainer(settings) => Arc::new(apptainer::ApptainerBackend::new(settings)?),
        Backend::Kubernetes(settings) => Arc::new(kubernetes::KubernetesBackend::new(settings)),
    })
}

/// Best-effort CUDA probe: a successful `nvidia-smi` run means drivers and at
/// least one GPU are present.
pub async fn cuda_available() -> bool {
    tokio::process::Command::new("nvidia-smi")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Decides between GPU and CPU execution. `None` means CPU. The two fatal
/// causes get distinct errors so users can tell a missing GPU apart from an
/// explicit `force_cpu` on a GPU-only algorithm.
pub fn resolve_device_requests(
    cuda_available: bool,
    force_cpu: bool,
    cpu_compatible: bool,
    cuda_devices: &str,
) -> Result<Option<GpuRequest>, BackendError> {
    if !cuda_available || force_cpu {
        if !cpu_compatible {
            return Err(if cuda_available {
                BackendError::CpuForcedNotSupported
            } else {
                BackendError::NoGpuAvailable
            });
        }
        info!("forcing CPU execution");
        return Ok(None);
    }
    Ok(Some(GpuRequest { device_ids: vec![cuda_devices.to_string()] }))
}

/// Local directory holding the algorithm's additional files: the versioned
/// Zenodo download when the descriptor declares a record, otherwise the
/// permanent empty dummy directory so the expected mount always exists.
pub async fn resolve_additional_files(descriptor: &AlgorithmDescriptor) -> Result<PathBuf, BackendError> {
    match &descriptor.additional_files {
        Some(additional) => Ok(ZenodoClient::new().resolve(&additional.record_id).await?),
        None => Ok(ZenodoClient::new().dummy_dir()?),
    }
}
