use std::path::PathBuf;

/// Voxel grid all BraTS challenges are resampled to. Algorithms may tolerate
/// other shapes, so deviations only warn.
pub const REFERENCE_SHAPE: [u16; 3] = [240, 240, 155];

pub const ZENODO_RECORD_BASE_URL: &str = "https://zenodo.org/api/records";

/// Manuscript describing this package, surfaced in the citation reminder.
pub const PACKAGE_CITATION: &str = "https://doi.org/10.48550/arXiv.2506.13807";

/// Standardized inputs all share this prefix; the sanity checker uses it to
/// avoid counting incidental files algorithms drop into the input directory.
pub const CANONICAL_INPUT_PREFIX: &str = "BraTS";

/// Environment variable overriding the configured execution backend.
pub const BACKEND_ENV_VAR: &str = "BRATS_BACKEND";

// Mount points of the legacy MLCube container convention (sequential slots:
// input, additional files, output, parameters).
pub const MLCUBE_INPUT_MOUNT: &str = "/mlcube_io0";
pub const MLCUBE_ADDITIONAL_FILES_MOUNT: &str = "/mlcube_io1";
pub const MLCUBE_OUTPUT_MOUNT: &str = "/mlcube_io2";
pub const MLCUBE_PARAMETERS_MOUNT: &str = "/mlcube_io3";

// Mount points of the modern plain-bind convention.
pub const INPUT_MOUNT: &str = "/input";
pub const OUTPUT_MOUNT: &str = "/output";

// Remote cluster job containers.
pub const JOB_CONTAINER: &str = "job-container";
pub const INIT_CONTAINER: &str = "init-container";
pub const FINALIZER_CONTAINER: &str = "finalizer-container";
pub const INIT_IMAGE: &str = "alpine:latest";

/// Sentinel file that unblocks the init/finalizer containers once the client
/// has finished staging or retrieving files.
pub const SENTINEL_FILE: &str = "/etc/content_verified";

/// Directory with bundled catalogs, parameters files and the additional-files
/// cache.
pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
}

pub fn meta_dir() -> PathBuf {
    data_dir().join("meta")
}

pub fn parameters_dir() -> PathBuf {
    data_dir().join("parameters")
}

pub fn dummy_parameters_file() -> PathBuf {
    parameters_dir().join("dummy.yml")
}

/// Cache for downloaded algorithm weights. Overridable so multi-user setups
/// can point it at a writable location.
pub fn additional_files_dir() -> PathBuf {
    match std::env::var_os("BRATS_ADDITIONAL_FILES_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => data_dir().join("additional_files"),
    }
}
