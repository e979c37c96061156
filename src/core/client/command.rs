//! Shared container invocation building blocks: volume layouts, command
//! arguments, container user and the citation banner. Used by all three
//! backends so the container sees identical semantics regardless of engine.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{AlgorithmDescriptor, StagingProtocol};
use crate::utils::constants::{
    dummy_parameters_file, parameters_dir, INPUT_MOUNT, MLCUBE_ADDITIONAL_FILES_MOUNT, MLCUBE_INPUT_MOUNT,
    MLCUBE_OUTPUT_MOUNT, MLCUBE_PARAMETERS_MOUNT, OUTPUT_MOUNT, PACKAGE_CITATION,
};

/// One host directory bound into the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeMapping {
    pub host: PathBuf,
    pub container: String,
}

impl VolumeMapping {
    fn new(host: &Path, container: &str) -> Self {
        Self { host: host.to_path_buf(), container: container.to_string() }
    }

    /// `host:container` bind notation shared by the local engines.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// Volume layout for the descriptor's staging protocol. Legacy submissions
/// expect the four sequential slots (input, additional files, output,
/// parameters); modern ones take plain input/output binds.
pub fn volume_mappings(
    descriptor: &AlgorithmDescriptor,
    input_dir: &Path,
    additional_files: &Path,
    output_dir: &Path,
) -> Vec<VolumeMapping> {
    match descriptor.staging_protocol() {
        StagingProtocol::Legacy => vec![
            VolumeMapping::new(input_dir, MLCUBE_INPUT_MOUNT),
            VolumeMapping::new(additional_files, MLCUBE_ADDITIONAL_FILES_MOUNT),
            VolumeMapping::new(output_dir, MLCUBE_OUTPUT_MOUNT),
            VolumeMapping::new(&parameters_dir(), MLCUBE_PARAMETERS_MOUNT),
        ],
        StagingProtocol::Modern => {
            vec![VolumeMapping::new(input_dir, INPUT_MOUNT), VolumeMapping::new(output_dir, OUTPUT_MOUNT)]
        }
    }
}

/// Parameters file for the container, keyed by the image repository name.
/// Some algorithms require a file to be present without reading it, so a
/// bundled dummy stands in when no dedicated file ships with the catalog.
pub fn parameters_file(descriptor: &AlgorithmDescriptor) -> Option<PathBuf> {
    if !descriptor.run_args.parameters_file {
        return None;
    }
    let dedicated = parameters_dir().join(format!("{}.yml", descriptor.image_repository()));
    Some(if dedicated.exists() { dedicated } else { dummy_parameters_file() })
}

fn parameters_arg(descriptor: &AlgorithmDescriptor, parameters_mount: &str) -> Option<String> {
    let file = parameters_file(descriptor)?;
    let name = file.file_name()?.to_string_lossy().to_string();
    Some(format!("--parameters_file={parameters_mount}/{name}"))
}

/// Argument list of the legacy `infer` entrypoint, with the mount points
/// supplied by the backend (MLCube slots locally, volume paths on the
/// cluster).
pub fn build_command_args(
    descriptor: &AlgorithmDescriptor,
    input_mount: &str,
    additional_files_mount: &str,
    output_mount: &str,
    parameters_mount: &str,
) -> Vec<String> {
    let mut args = vec![format!("--data_path={input_mount}"), format!("--output_path={output_mount}")];
    if let Some(additional) = &descriptor.additional_files {
        for (i, param) in additional.param_name.iter().enumerate() {
            let mut arg = format!("--{param}={additional_files_mount}");
            if let Some(sub_paths) = &additional.param_path {
                if let Some(sub) = sub_paths.get(i) {
                    arg.push_str(&format!("/{sub}"));
                }
            }
            args.push(arg);
        }
    }
    if let Some(arg) = parameters_arg(descriptor, parameters_mount) {
        args.push(arg);
    }
    args
}

/// `uid:gid` the container should run as, unless the algorithm requires
/// root. Running as the invoking user keeps produced files owned by them.
pub async fn container_user(descriptor: &AlgorithmDescriptor) -> Option<String> {
    if descriptor.run_args.requires_root {
        return None;
    }
    match (probe_id("-u").await, probe_id("-g").await) {
        (Some(uid), Some(gid)) => Some(format!("{uid}:{gid}")),
        _ => {
            warn!("could not determine the current uid/gid, running the container as root");
            None
        }
    }
}

async fn probe_id(flag: &str) -> Option<String> {
    let output = tokio::process::Command::new("id").arg(flag).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Citation reminder plus a short summary of what is about to run.
pub fn log_algorithm_banner(descriptor: &AlgorithmDescriptor) {
    let meta = &descriptor.meta;
    info!("please support the development by citing the relevant manuscripts for the used algorithm:");
    info!("  package: {PACKAGE_CITATION}");
    info!("  challenge ({} {}): {}", meta.challenge, meta.year, meta.challenge_manuscript);
    info!("  algorithm ({}): {}", meta.authors, meta.paper);
    if let Some(dataset) = &meta.dataset_manuscript {
        info!("  dataset: {dataset}");
    }
    info!("running algorithm: BraTS {} {} [{} place]", meta.year, meta.challenge, meta.rank);
    debug!("container image: {}", descriptor.run_args.docker_image);
}
