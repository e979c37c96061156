//! Shared fixtures: algorithm descriptor builders and on-disk volume
//! helpers used across the test modules.

use std::path::Path;

use ndarray::Array3;

use crate::config::{AdditionalFiles, AlgorithmDescriptor, MetaData, RunArgs};

pub const STRUCTURAL: [&str; 4] = ["t1c", "t1n", "t2f", "t2w"];

pub fn descriptor_with_year(year: u16) -> AlgorithmDescriptor {
    AlgorithmDescriptor {
        meta: MetaData {
            authors: "Jane Doe, et al.".to_string(),
            paper: "https://arxiv.org/abs/0000.00000".to_string(),
            challenge: "Adult Glioma Segmentation".to_string(),
            challenge_manuscript: "https://arxiv.org/abs/1111.11111".to_string(),
            rank: "1st".to_string(),
            year,
            dataset_manuscript: None,
        },
        run_args: RunArgs {
            docker_image: "brainles/test-algorithm:latest".to_string(),
            input_name_schema: "BraTS-GLI-{id:05d}-000".to_string(),
            parameters_file: false,
            requires_root: false,
            shm_size: "2gb".to_string(),
            cpu_compatible: true,
            subject_modality_separator: '-',
        },
        additional_files: None,
    }
}

pub fn descriptor_with_additional_files(
    param_name: &[&str],
    param_path: Option<&[&str]>,
) -> AlgorithmDescriptor {
    let mut descriptor = descriptor_with_year(2023);
    descriptor.additional_files = Some(AdditionalFiles {
        record_id: "123".to_string(),
        param_name: param_name.iter().map(|p| p.to_string()).collect(),
        param_path: param_path.map(|paths| paths.iter().map(|p| p.to_string()).collect()),
    });
    descriptor
}

/// Writes a small constant-valued NIfTI volume.
pub fn write_volume(path: &Path, value: f32) {
    let data = Array3::<f32>::from_elem((4, 4, 4), value);
    nifti::writer::WriterOptions::new(path).write_nifti(&data).unwrap();
}

/// Creates a batch subject directory following the
/// `{subject}/{subject}-{modality}.nii.gz` convention. The files hold
/// placeholder bytes; tests that need readable volumes use `write_volume`.
pub fn write_subject(root: &Path, name: &str, modalities: &[&str]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for modality in modalities {
        std::fs::write(dir.join(format!("{name}-{modality}.nii.gz")), b"volume").unwrap();
    }
}
