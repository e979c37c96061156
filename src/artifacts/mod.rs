use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::constants::{additional_files_dir, ZENODO_RECORD_BASE_URL};

/// Error types for the artifact repository client
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Fatal only when no usable local cached copy exists; otherwise the
    /// caller degrades to a warning and proceeds with the stale copy.
    #[error("additional files for record '{0}' not found locally and Zenodo could not be reached")]
    Unreachable(String),

    #[error("Zenodo returned status {status} for record '{record_id}'")]
    BadStatus { record_id: String, status: reqwest::StatusCode },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Version and archive location of one Zenodo record.
#[derive(Clone, Debug)]
pub struct RecordMetadata {
    pub version: String,
    pub archive_url: String,
}

#[derive(Deserialize)]
struct RecordResponse {
    metadata: RecordMeta,
    links: RecordLinks,
}

#[derive(Deserialize)]
struct RecordMeta {
    version: String,
}

#[derive(Deserialize)]
struct RecordLinks {
    archive: String,
}

/// Client resolving versioned additional-files directories from Zenodo
/// records, with a local cache under the data directory.
#[derive(Clone, Debug)]
pub struct ZenodoClient {
    http: reqwest::Client,
    base_url: String,
    cache_dir: PathBuf,
}

impl Default for ZenodoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ZenodoClient {
    pub fn new() -> Self {
        Self::with_base_url(ZENODO_RECORD_BASE_URL, additional_files_dir())
    }

    pub fn with_base_url(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), cache_dir: cache_dir.into() }
    }

    /// Fetches version and archive URL for a record.
    pub async fn fetch_metadata(&self, record_id: &str) -> Result<RecordMetadata, ArtifactError> {
        let url = format!("{}/{}", self.base_url, record_id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ArtifactError::BadStatus { record_id: record_id.to_string(), status: response.status() });
        }
        let record: RecordResponse = response.json().await?;
        Ok(RecordMetadata { version: record.metadata.version, archive_url: record.links.archive })
    }

    /// Resolves a local directory holding the record's files: downloads when
    /// absent or stale, reuses the cache otherwise. Unreachable Zenodo is
    /// fatal only without a local copy.
    pub async fn resolve(&self, record_id: &str) -> Result<PathBuf, ArtifactError> {
        let metadata = match self.fetch_metadata(record_id).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("failed to fetch Zenodo metadata for record '{record_id}': {e}");
                None
            }
        };
        let local = self.latest_local_version(record_id);

        match (metadata, local) {
            (None, None) => Err(ArtifactError::Unreachable(record_id.to_string())),
            (None, Some((version, dir))) => {
                warn!("Zenodo could not be reached, using latest downloaded additional files (v{version})");
                Ok(dir)
            }
            (Some(metadata), Some((version, dir))) if version == metadata.version => {
                info!("latest additional files for record '{record_id}' already present (v{version})");
                Ok(dir)
            }
            (Some(metadata), stale) => {
                if let Some((version, dir)) = stale {
                    info!(
                        "new additional files available on Zenodo (v{} over v{version}), replacing",
                        metadata.version
                    );
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        warn!("failed to delete stale additional files {}: {e}", dir.display());
                    }
                } else {
                    info!("additional files for record '{record_id}' not found locally");
                }
                self.download(record_id, &metadata).await
            }
        }
    }

    /// Latest non-empty cached version directory for a record, if any.
    pub fn latest_local_version(&self, record_id: &str) -> Option<(String, PathBuf)> {
        let prefix = format!("{record_id}_v");
        let mut versions: Vec<(Vec<u32>, String, PathBuf)> = std::fs::read_dir(&self.cache_dir)
            .ok()?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let version = name.strip_prefix(&prefix)?.to_string();
                let parsed: Vec<u32> = version.split('.').map(|p| p.parse().unwrap_or(0)).collect();
                // skip interrupted (empty) downloads
                let has_content = std::fs::read_dir(entry.path()).map(|mut d| d.next().is_some()).unwrap_or(false);
                has_content.then_some((parsed, version, entry.path()))
            })
            .collect();
        versions.sort();
        versions.pop().map(|(_, version, path)| (version, path))
    }

    async fn download(&self, record_id: &str, metadata: &RecordMetadata) -> Result<PathBuf, ArtifactError> {
        let record_folder = self.cache_dir.join(format!("{record_id}_v{}", metadata.version));
        std::fs::create_dir_all(&record_folder)?;

        info!("downloading additional files from Zenodo, this might take a while...");
        let response = self.http.get(&metadata.archive_url).send().await?;
        if !response.status().is_success() {
            return Err(ArtifactError::BadStatus { record_id: record_id.to_string(), status: response.status() });
        }
        let bytes = response.bytes().await?;
        debug!("downloaded {} bytes for record '{record_id}'", bytes.len());

        extract_archive(&bytes, &record_folder)?;
        info!("archive extracted successfully to {}", record_folder.display());
        Ok(record_folder)
    }

    /// Permanent empty directory mounted when an algorithm declares no
    /// additional files, so the expected mount point is always present.
    pub fn dummy_dir(&self) -> std::io::Result<PathBuf> {
        let dummy = self.cache_dir.join("dummy");
        std::fs::create_dir_all(&dummy)?;
        Ok(dummy)
    }
}

/// Extracts the record archive, including one level of nested zips (Zenodo
/// wraps multi-file records in an outer archive).
fn extract_archive(bytes: &[u8], record_folder: &Path) -> Result<(), ArtifactError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    archive.extract(record_folder)?;

    for entry in std::fs::read_dir(record_folder)?.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
            let file = std::fs::File::open(&path)?;
            let mut nested = zip::ZipArchive::new(file)?;
            nested.extract(record_folder)?;
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
