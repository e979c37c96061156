//! Cross-modality synthesis facade: given three of the four structural
//! modalities, synthesizes the missing one. Output filenames embed the
//! synthesized modality, so output handling differs from the other tasks.

use std::path::Path;

use crate::config::AlgorithmDescriptor;
use crate::core::job::{InferenceJob, StructuralInputs};
use crate::error::BratsResult;
use crate::types::{ClientOptions, ModalityRule, Task};
use crate::utils::constants::meta_dir;

pub struct MissingMri {
    job: InferenceJob,
}

impl MissingMri {
    pub fn new(algorithm_key: &str, options: ClientOptions) -> BratsResult<Self> {
        let job = InferenceJob::new(
            &meta_dir().join("missing_mri.yml"),
            algorithm_key,
            Task::MissingMri,
            |_| ModalityRule::ThreeOfFour,
            options,
        )?;
        Ok(Self { job })
    }

    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        self.job.descriptor()
    }

    /// Synthesizes the missing modality for a single subject. Exactly three
    /// of the four structural modalities must be supplied.
    pub async fn infer_single(
        &self,
        inputs: StructuralInputs,
        output_file: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.job.infer_single(inputs.into_map(), output_file, log_file).await
    }

    /// Synthesizes the missing modality for every subject directory under
    /// `data_folder`; each subject must hold exactly three structural
    /// modality files. Outputs are written as
    /// `{output_folder}/{subject}-{modality}.nii.gz`.
    pub async fn infer_batch(
        &self,
        data_folder: &Path,
        output_folder: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.job.infer_batch(data_folder, output_folder, log_file).await
    }
}
