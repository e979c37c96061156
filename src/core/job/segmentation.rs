//! Tumor segmentation facade covering all segmentation challenges.

use std::path::{Path, PathBuf};

use crate::config::AlgorithmDescriptor;
use crate::core::job::{InferenceJob, StructuralInputs};
use crate::error::BratsResult;
use crate::types::{ClientOptions, ModalityRule, Task};
use crate::utils::constants::meta_dir;

/// Supported segmentation challenges, each backed by its own bundled
/// algorithm catalog.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentationChallenge {
    AdultGlioma,
    Meningioma,
    Pediatric,
    Africa,
    Metastases,
    GoAT,
}

impl SegmentationChallenge {
    pub fn catalog(&self) -> PathBuf {
        let file = match self {
            SegmentationChallenge::AdultGlioma => "adult_glioma.yml",
            SegmentationChallenge::Meningioma => "meningioma.yml",
            SegmentationChallenge::Pediatric => "pediatric.yml",
            SegmentationChallenge::Africa => "africa.yml",
            SegmentationChallenge::Metastases => "metastases.yml",
            SegmentationChallenge::GoAT => "goat.yml",
        };
        meta_dir().join(file)
    }

    /// Required modalities for an algorithm of this challenge. Meningioma
    /// moved to a t1c-only radiotherapy protocol with its 2024 algorithms;
    /// earlier entries still take all four structural images.
    pub(crate) fn rule(&self, descriptor: &AlgorithmDescriptor) -> ModalityRule {
        match self {
            SegmentationChallenge::Meningioma if descriptor.meta.year >= 2024 => ModalityRule::OnlyT1c,
            _ => ModalityRule::AllFour,
        }
    }
}

/// Runs tumor segmentation algorithms on MRI data.
pub struct Segmenter {
    job: InferenceJob,
}

impl Segmenter {
    pub fn new(
        challenge: SegmentationChallenge,
        algorithm_key: &str,
        options: ClientOptions,
    ) -> BratsResult<Self> {
        let job = InferenceJob::new(
            &challenge.catalog(),
            algorithm_key,
            Task::Segmentation,
            |descriptor| challenge.rule(descriptor),
            options,
        )?;
        Ok(Self { job })
    }

    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        self.job.descriptor()
    }

    pub fn algorithm_key(&self) -> &str {
        self.job.algorithm_key()
    }

    /// Segments a single subject and saves the result to `output_file`.
    pub async fn infer_single(
        &self,
        inputs: StructuralInputs,
        output_file: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.job.infer_single(inputs.into_map(), output_file, log_file).await
    }

    /// Segments every subject directory under `data_folder`, expecting the
    /// `{subject}/{subject}-{modality}.nii.gz` layout, and writes
    /// `{output_folder}/{subject}.nii.gz` per subject.
    pub async fn infer_batch(
        &self,
        data_folder: &Path,
        output_folder: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.job.infer_batch(data_folder, output_folder, log_file).await
    }
}
