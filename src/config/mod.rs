use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Error types for catalog loading. `InvalidCatalog` (syntactically valid
/// YAML violating the descriptor schema) is deliberately distinct from
/// `NotFound` because callers react differently to the two.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("algorithm catalog not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed algorithm catalog {}: {source}", path.display())]
    InvalidCatalog {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("algorithm '{key}' not found in catalog {}", path.display())]
    UnknownAlgorithm { key: String, path: PathBuf },

    #[error("failed to read algorithm catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which staging protocol and container invocation convention an algorithm
/// uses. Legacy submissions follow the MLCube four-slot layout with an
/// `infer` sub-command; modern ones take two plain input/output binds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StagingProtocol {
    Legacy,
    Modern,
}

/// Descriptive metadata of one algorithm entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaData {
    pub authors: String,
    pub paper: String,
    pub challenge: String,
    pub challenge_manuscript: String,
    pub rank: String,
    pub year: u16,
    #[serde(default)]
    pub dataset_manuscript: Option<String>,
}

/// Container run requirements of one algorithm entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunArgs {
    /// Container image reference holding the algorithm.
    pub docker_image: String,
    /// Template producing the canonical subject id, e.g.
    /// `BraTS-GLI-{id:05d}-000`.
    pub input_name_schema: String,
    /// Whether a parameters file must be synthesized for the container.
    pub parameters_file: bool,
    /// Discouraged, but some submissions do not work without root.
    pub requires_root: bool,
    #[serde(default = "default_shm_size")]
    pub shm_size: String,
    #[serde(default)]
    pub cpu_compatible: bool,
    /// Separator joining subject id and modality in filenames. Most
    /// challenges use a hyphen.
    #[serde(default = "default_separator")]
    pub subject_modality_separator: char,
}

/// Externally hosted weights/config an algorithm needs at runtime.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdditionalFiles {
    /// Zenodo record id of the artifact archive.
    pub record_id: String,
    /// CLI parameter names under which the artifact directory is exposed.
    #[serde(default = "default_param_name")]
    pub param_name: Vec<String>,
    /// Optional sub-paths within the artifact directory, parallel to
    /// `param_name`.
    #[serde(default)]
    pub param_path: Option<Vec<String>>,
}

/// Immutable record describing one algorithm's metadata and run
/// requirements. Loaded once per job-class instantiation, read-only after.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlgorithmDescriptor {
    pub meta: MetaData,
    pub run_args: RunArgs,
    #[serde(default)]
    pub additional_files: Option<AdditionalFiles>,
}

impl AlgorithmDescriptor {
    pub fn staging_protocol(&self) -> StagingProtocol {
        if self.meta.year <= 2024 {
            StagingProtocol::Legacy
        } else {
            StagingProtocol::Modern
        }
    }

    /// Repository name of the image without registry or tag; keys the
    /// per-algorithm parameters file.
    pub fn image_repository(&self) -> &str {
        let image = &self.run_args.docker_image;
        let without_tag = image.split(':').next().unwrap_or(image);
        without_tag.rsplit('/').next().unwrap_or(without_tag)
    }

    /// Shared-memory size in bytes for the container engine, parsed from the
    /// catalog's `"2gb"`-style notation.
    pub fn shm_size_bytes(&self) -> Option<i64> {
        let value = self.run_args.shm_size.to_ascii_lowercase();
        let (number, factor) = if let Some(n) = value.strip_suffix("gb") {
            (n, 1024 * 1024 * 1024)
        } else if let Some(n) = value.strip_suffix("mb") {
            (n, 1024 * 1024)
        } else {
            (value.as_str(), 1)
        };
        number.trim().parse::<i64>().ok().map(|n| n * factor)
    }

    /// The same size in the cluster scheduler's quantity notation
    /// (`"2gb"` -> `"2Gi"`).
    pub fn shm_size_quantity(&self) -> String {
        self.run_args.shm_size.replace("gb", "Gi").replace("mb", "Mi")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Catalog {
    algorithms: BTreeMap<String, AlgorithmDescriptor>,
}

fn default_shm_size() -> String {
    "2gb".to_string()
}

fn default_separator() -> char {
    '-'
}

fn default_param_name() -> Vec<String> {
    vec!["weights".to_string()]
}

/// Loads the per-challenge catalog into typed descriptors. Re-read on every
/// job-class construction; cheap and read-only.
pub fn load_algorithms(path: &Path) -> Result<BTreeMap<String, AlgorithmDescriptor>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io { path: path.to_path_buf(), source }
        }
    })?;
    let catalog: Catalog = serde_yaml::from_str(&raw)
        .map_err(|source| ConfigError::InvalidCatalog { path: path.to_path_buf(), source })?;
    Ok(catalog.algorithms)
}

/// Loads the catalog and selects one algorithm entry, failing fast on an
/// unrecognized key.
pub fn select_algorithm(path: &Path, key: &str) -> Result<AlgorithmDescriptor, ConfigError> {
    let mut algorithms = load_algorithms(path)?;
    algorithms
        .remove(key)
        .ok_or_else(|| ConfigError::UnknownAlgorithm { key: key.to_string(), path: path.to_path_buf() })
}
