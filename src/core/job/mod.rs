//! Job orchestration: one parameterized inference job shared by all
//! challenge facades. The job owns the selected algorithm descriptor, the
//! challenge's modality rule and the execution backend, and implements the
//! single/batch flows: validate, stage into scratch directories, run the
//! container, relocate outputs under the caller's names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{select_algorithm, AlgorithmDescriptor};
use crate::core::client::{build_backend, ExecutionBackend};
use crate::error::{BratsError, BratsResult};
use crate::types::{ClientOptions, DeviceConfig, Modality, ModalityRule, Task};
use crate::utils::logging::{self, LogFileGuard};
use crate::utils::staging;

pub mod inpainting;
pub mod missing_mri;
pub mod segmentation;

pub use inpainting::Inpainter;
pub use missing_mri::MissingMri;
pub use segmentation::{SegmentationChallenge, Segmenter};

/// Structural-modality input set for segmentation and synthesis runs. Leave
/// a field `None` when the challenge does not require (or should synthesize)
/// that modality.
#[derive(Clone, Debug, Default)]
pub struct StructuralInputs {
    pub t1c: Option<PathBuf>,
    pub t1n: Option<PathBuf>,
    pub t2f: Option<PathBuf>,
    pub t2w: Option<PathBuf>,
}

impl StructuralInputs {
    pub fn into_map(self) -> BTreeMap<Modality, PathBuf> {
        [
            (Modality::T1c, self.t1c),
            (Modality::T1n, self.t1n),
            (Modality::T2f, self.t2f),
            (Modality::T2w, self.t2w),
        ]
        .into_iter()
        .filter_map(|(modality, path)| path.map(|p| (modality, p)))
        .collect()
    }
}

/// One configured algorithm, ready to run single or batch inference.
pub struct InferenceJob {
    descriptor: AlgorithmDescriptor,
    algorithm_key: String,
    task: Task,
    rule: ModalityRule,
    backend: Arc<dyn ExecutionBackend>,
    device: DeviceConfig,
}

impl InferenceJob {
    pub(crate) fn new(
        catalog: &Path,
        algorithm_key: &str,
        task: Task,
        rule_for: impl FnOnce(&AlgorithmDescriptor) -> ModalityRule,
        options: ClientOptions,
    ) -> BratsResult<Self> {
        let descriptor = select_algorithm(catalog, algorithm_key)?;
        let rule = rule_for(&descriptor);
        let backend = build_backend(options.backend.resolve_env_override())?;
        info!("instantiated job with algorithm {algorithm_key} by {}", descriptor.meta.authors);
        Ok(Self {
            descriptor,
            algorithm_key: algorithm_key.to_string(),
            task,
            rule,
            backend,
            device: options.device,
        })
    }

    /// Assembles a job from already-resolved parts, bypassing catalog and
    /// backend selection.
    pub(crate) fn from_parts(
        descriptor: AlgorithmDescriptor,
        algorithm_key: &str,
        task: Task,
        rule: ModalityRule,
        backend: Arc<dyn ExecutionBackend>,
        device: DeviceConfig,
    ) -> Self {
        Self { descriptor, algorithm_key: algorithm_key.to_string(), task, rule, backend, device }
    }

    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        &self.descriptor
    }

    pub fn algorithm_key(&self) -> &str {
        &self.algorithm_key
    }

    fn log_guard(log_file: Option<&Path>) -> BratsResult<Option<LogFileGuard>> {
        Ok(match log_file {
            Some(path) => Some(logging::attach_log_file(path)?),
            None => None,
        })
    }

    /// Runs the algorithm on one subject and writes the result to
    /// `output_file`. The modality set is validated against the challenge
    /// rule before any filesystem work happens.
    pub async fn infer_single(
        &self,
        inputs: BTreeMap<Modality, PathBuf>,
        output_file: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.rule.validate(&inputs)?;
        let _log_guard = Self::log_guard(log_file)?;
        let scratch = staging::ScratchDirs::create()?;

        info!("performing single inference");
        // the index is arbitrary for a single subject
        let subject_id = staging::format_subject_id(&self.descriptor.run_args.input_name_schema, 0);
        staging::standardize_single_inputs(
            &scratch.input,
            &subject_id,
            &inputs,
            self.descriptor.run_args.subject_modality_separator,
        )?;

        self.backend.run(&self.descriptor, &scratch.input, &scratch.output, &self.device, None).await?;

        self.collect_single_output(&scratch.output, &subject_id, output_file)?;
        info!("saved output to: {}", output_file.display());
        Ok(())
    }

    /// Runs the algorithm on every subject directory under `data_folder` and
    /// writes results to `output_folder` under the external subject names.
    pub async fn infer_batch(
        &self,
        data_folder: &Path,
        output_folder: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        let _log_guard = Self::log_guard(log_file)?;
        let scratch = staging::ScratchDirs::create()?;

        let subjects = staging::discover_subjects(data_folder)?;
        let preview: Vec<String> = subjects
            .iter()
            .filter_map(|subject| subject.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .take(5)
            .collect();
        info!(
            "found {} subjects: {}{}",
            subjects.len(),
            preview.join(", "),
            if subjects.len() > 5 { " ..." } else { "" }
        );

        let name_map = staging::standardize_batch_inputs(
            &scratch.input,
            &subjects,
            &self.descriptor.run_args.input_name_schema,
            self.descriptor.run_args.subject_modality_separator,
            self.rule,
        )?;
        info!("standardized input names to match algorithm requirements");

        self.backend
            .run(&self.descriptor, &scratch.input, &scratch.output, &self.device, Some(&name_map))
            .await?;

        self.collect_batch_outputs(&scratch.output, output_folder, &name_map)?;
        info!("saved outputs to: {}", output_folder.display());
        Ok(())
    }

    fn collect_single_output(
        &self,
        scratch_output: &Path,
        subject_id: &str,
        output_file: &Path,
    ) -> BratsResult<()> {
        let missing = || BratsError::OutputMissing {
            subject: subject_id.to_string(),
            dir: scratch_output.to_path_buf(),
        };
        let produced = match self.task {
            // synthesized outputs embed the produced modality in their name,
            // so there is exactly one file with no fixed name
            Task::MissingMri => {
                std::fs::read_dir(scratch_output)?.flatten().map(|entry| entry.path()).next().ok_or_else(missing)?
            }
            _ => {
                let identifier = extract_identifier(subject_id);
                find_output(scratch_output, &identifier)?.ok_or_else(missing)?
            }
        };
        if let Some(parent) = output_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        move_file(&produced, output_file)?;
        Ok(())
    }

    fn collect_batch_outputs(
        &self,
        scratch_output: &Path,
        output_folder: &Path,
        name_map: &BTreeMap<String, String>,
    ) -> BratsResult<()> {
        std::fs::create_dir_all(output_folder)?;
        for (internal, external) in name_map {
            let (produced, file_name) = match self.task {
                Task::MissingMri => {
                    let Some(produced) = find_output(scratch_output, internal)? else {
                        error!("no output found for subject {internal} in {}", scratch_output.display());
                        continue;
                    };
                    let modality = produced
                        .file_name()
                        .and_then(|name| name.to_str())
                        .and_then(|name| name.split('-').next_back())
                        .and_then(|tail| tail.split('.').next())
                        .filter(|modality| !modality.is_empty())
                        .map(str::to_string);
                    let file_name = match modality {
                        Some(modality) => format!("{external}-{modality}.nii.gz"),
                        None => {
                            warn!("could not extract modality from {}", produced.display());
                            format!("{external}.nii.gz")
                        }
                    };
                    (produced, file_name)
                }
                _ => {
                    let identifier = extract_identifier(internal);
                    let Some(produced) = find_output(scratch_output, &identifier)? else {
                        error!("no output found for subject {internal} in {}", scratch_output.display());
                        continue;
                    };
                    (produced, format!("{external}.nii.gz"))
                }
            };
            move_file(&produced, &output_folder.join(file_name))?;
        }
        Ok(())
    }
}

/// Trailing identifier of a canonical subject id, e.g.
/// `BraTS-MEN-00000-000` -> `00000-000`. Algorithms keep this part in their
/// output filenames.
fn extract_identifier(subject_id: &str) -> String {
    let parts: Vec<&str> = subject_id.split('-').collect();
    if parts.len() >= 2 {
        parts[parts.len() - 2..].join("-")
    } else {
        subject_id.to_string()
    }
}

fn find_output(dir: &Path, needle: &str) -> std::io::Result<Option<PathBuf>> {
    Ok(std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.file_name().is_some_and(|name| name.to_string_lossy().contains(needle))))
}

/// Rename where possible, copy-and-delete across filesystem boundaries
/// (scratch directories usually live on a different mount than the caller's
/// output location).
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}
