use tracing::warn;

use crate::types::{DeviceConfig, RetryPolicy};
use crate::utils::constants::BACKEND_ENV_VAR;

/// Which execution environment runs the algorithm container. Selected by
/// caller configuration, never by algorithm metadata.
#[derive(Clone, Debug)]
pub enum Backend {
    /// Local container engine daemon.
    Docker,
    /// Local sandboxed containers via the Apptainer CLI.
    Apptainer(ApptainerSettings),
    /// Remote cluster scheduler with persistent-volume staging.
    Kubernetes(KubernetesSettings),
}

impl Backend {
    /// Applies the `BRATS_BACKEND` environment override, keeping the
    /// configured settings where the override names the same backend kind.
    pub fn resolve_env_override(self) -> Backend {
        let Some(value) = std::env::var(BACKEND_ENV_VAR).ok() else {
            return self;
        };
        match value.to_ascii_lowercase().as_str() {
            "docker" => Backend::Docker,
            "apptainer" | "singularity" => match self {
                Backend::Apptainer(settings) => Backend::Apptainer(settings),
                _ => Backend::Apptainer(ApptainerSettings::default()),
            },
            "kubernetes" => match self {
                Backend::Kubernetes(settings) => Backend::Kubernetes(settings),
                _ => Backend::Kubernetes(KubernetesSettings::default()),
            },
            other => {
                warn!("ignoring unknown {BACKEND_ENV_VAR} value '{other}'");
                self
            }
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Docker
    }
}

#[derive(Clone, Debug)]
pub struct ApptainerSettings {
    /// Size of the writable overlay image in MiB. Must be positive.
    pub overlay_size_mib: u32,
}

impl Default for ApptainerSettings {
    fn default() -> Self {
        Self { overlay_size_mib: 1024 }
    }
}

#[derive(Clone, Debug)]
pub struct KubernetesSettings {
    pub namespace: String,
    /// Reusing a claim name across submissions skips creation and assumes the
    /// claim already holds the staged input data.
    pub pvc_name: Option<String>,
    pub pvc_storage_size: String,
    pub pvc_storage_class: Option<String>,
    pub job_name: Option<String>,
    /// Where the working persistent volume is mounted inside job pods.
    pub data_mount_path: String,
    pub poll: RetryPolicy,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            pvc_name: None,
            pvc_storage_size: "1Gi".to_string(),
            pvc_storage_class: None,
            job_name: None,
            data_mount_path: "/data".to_string(),
            poll: RetryPolicy::pod_default(),
        }
    }
}

/// Caller-facing construction options shared by all job facades.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub backend: Backend,
    pub device: DeviceConfig,
}
