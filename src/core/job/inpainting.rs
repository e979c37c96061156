//! Inpainting facade: reconstructs healthy tissue inside a masked region of
//! a voided native T1 image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::AlgorithmDescriptor;
use crate::core::job::InferenceJob;
use crate::error::BratsResult;
use crate::types::{ClientOptions, Modality, ModalityRule, Task};
use crate::utils::constants::meta_dir;

pub struct Inpainter {
    job: InferenceJob,
}

impl Inpainter {
    pub fn new(algorithm_key: &str, options: ClientOptions) -> BratsResult<Self> {
        let job = InferenceJob::new(
            &meta_dir().join("inpainting.yml"),
            algorithm_key,
            Task::Inpainting,
            |_| ModalityRule::InpaintingPair,
            options,
        )?;
        Ok(Self { job })
    }

    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        self.job.descriptor()
    }

    /// Inpaints a single subject from the voided t1n image and the mask
    /// marking the region to fill.
    pub async fn infer_single(
        &self,
        t1n_voided: &Path,
        mask: &Path,
        output_file: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        let inputs: BTreeMap<Modality, PathBuf> = [
            (Modality::T1nVoided, t1n_voided.to_path_buf()),
            (Modality::Mask, mask.to_path_buf()),
        ]
        .into_iter()
        .collect();
        self.job.infer_single(inputs, output_file, log_file).await
    }

    /// Inpaints every subject directory under `data_folder`, expecting
    /// `{subject}/{subject}-t1n-voided.nii.gz` and
    /// `{subject}/{subject}-mask.nii.gz` per subject.
    pub async fn infer_batch(
        &self,
        data_folder: &Path,
        output_folder: &Path,
        log_file: Option<&Path>,
    ) -> BratsResult<()> {
        self.job.infer_batch(data_folder, output_folder, log_file).await
    }
}
