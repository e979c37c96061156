use std::path::PathBuf;

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::config::ConfigError;
use crate::core::client::BackendError;

/// Result type for all caller-facing operations
pub type BratsResult<T> = Result<T, BratsError>;

/// Error types surfaced by the inference client
#[derive(Error, Debug)]
pub enum BratsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Artifact repository error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Caller-supplied modality set violates the challenge's arity rule.
    /// Raised before any filesystem work happens.
    #[error("Input validation error: {0}")]
    InvalidInput(String),

    /// The algorithm reported success but the expected output file for a
    /// subject could not be located in the scratch output directory.
    #[error("No output found for subject {subject} in {}", dir.display())]
    OutputMissing { subject: String, dir: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
