use thiserror::Error;

/// Error types for the execution backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("the selected algorithm only runs on GPU, but CPU execution was forced")]
    CpuForcedNotSupported,

    #[error("no CUDA-capable device is available and the selected algorithm is not CPU compatible")]
    NoGpuAvailable,

    #[error("algorithm container exited with status {status}")]
    ContainerFailed { status: i64, log: String },

    /// The container exited cleanly but produced fewer outputs than inputs.
    #[error("not enough output files were created by the algorithm: expected {expected}, got {got}")]
    IncompleteOutput { expected: usize, got: usize, log: String },

    #[error("pod '{pod}' did not reach the expected state within {waited_secs}s")]
    PollTimeout { pod: String, waited_secs: u64 },

    #[error("overlay size must be a positive number of MiB")]
    InvalidOverlaySize,

    /// Failures of the sandbox CLI (build, overlay or run invocations).
    #[error("sandbox command failed: {0}")]
    Sandbox(String),

    #[error("container engine error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("cluster API error: {0}")]
    Cluster(#[from] kube::Error),

    #[error(transparent)]
    Artifact(#[from] crate::artifacts::ArtifactError),

    #[error("failed to decode retrieved archive: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
