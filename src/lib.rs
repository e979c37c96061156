//! Client library for running BraTS challenge algorithms on brain MRI data.
//!
//! The library standardizes caller-supplied NIfTI images into the canonical
//! challenge layout, resolves algorithm weights from Zenodo, and dispatches
//! the containerized algorithm to one of three execution backends: a local
//! Docker daemon, Apptainer sandboxes, or a Kubernetes cluster.

pub mod artifacts;
pub mod config;
pub mod core;
pub mod error;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod tests;

pub use crate::core::job::{
    Inpainter, MissingMri, SegmentationChallenge, Segmenter, StructuralInputs,
};
pub use crate::error::{BratsError, BratsResult};
pub use crate::types::{ApptainerSettings, Backend, ClientOptions, DeviceConfig, KubernetesSettings};
