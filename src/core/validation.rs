use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use tracing::{error, warn};

use crate::core::client::BackendError;
use crate::types::{Modality, NameMap};
use crate::utils::constants::{CANONICAL_INPUT_PREFIX, REFERENCE_SHAPE};

fn image_dims(path: &Path) -> Result<[u16; 3], nifti::NiftiError> {
    let object = ReaderOptions::new().read_file(path)?;
    let dim = object.header().dim;
    Ok([dim[1], dim[2], dim[3]])
}

/// Warns (never errors) when input images deviate from the reference voxel
/// grid, naming every non-conforming modality. Some algorithms tolerate
/// other shapes, so this never blocks execution.
pub fn input_shape_check(inputs: &BTreeMap<Modality, PathBuf>) {
    let mut offending = Vec::new();
    for (modality, path) in inputs {
        match image_dims(path) {
            Ok(dims) if dims != REFERENCE_SHAPE => offending.push(format!("{modality}: {dims:?}")),
            Ok(_) => {}
            Err(e) => warn!("could not read shape of {modality} image {}: {e}", path.display()),
        }
    }
    if !offending.is_empty() {
        warn!(
            "input images do not have the default shape {REFERENCE_SHAPE:?}, which might cause \
             issues with some algorithms: {}",
            offending.join(", ")
        );
        warn!(
            "if your data is not preprocessed yet, consider using the BrainLesion preprocessing \
             package: https://github.com/BrainLesion/preprocessing"
        );
    }
}

/// Post-execution validation: the algorithm must have produced at least one
/// output per canonical input, and outputs should not be entirely
/// zero-valued (warning only, attributed to the external subject name when a
/// name map is available).
pub fn sanity_check_output(
    input_dir: &Path,
    output_dir: &Path,
    container_log: &str,
    name_map: Option<&NameMap>,
) -> Result<(), BackendError> {
    // Some algorithms create extra files in the input directory, so only
    // entries following the canonical naming convention are counted.
    let inputs = std::fs::read_dir(input_dir)?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(CANONICAL_INPUT_PREFIX))
        .count();
    let outputs: Vec<PathBuf> = std::fs::read_dir(output_dir)?.flatten().map(|entry| entry.path()).collect();

    if outputs.len() < inputs {
        error!("container log: \n{container_log}");
        return Err(BackendError::IncompleteOutput {
            expected: inputs,
            got: outputs.len(),
            log: container_log.to_string(),
        });
    }

    for output in &outputs {
        match volume_is_all_zero(output) {
            Ok(true) => {
                let file_name = output.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let subject = name_map
                    .and_then(|map| map.iter().find(|(internal, _)| file_name.contains(internal.as_str())))
                    .map(|(_, external)| external.as_str())
                    .unwrap_or("<unknown>");
                warn!(
                    "output file for subject {subject} contains only zeros; the selected algorithm \
                     might not work properly with your data unless this behavior is correct for \
                     your use case"
                );
            }
            Ok(false) => {}
            Err(e) => warn!("could not inspect output file {}: {e}", output.display()),
        }
    }
    Ok(())
}

fn volume_is_all_zero(path: &Path) -> Result<bool, nifti::NiftiError> {
    let object = ReaderOptions::new().read_file(path)?;
    let data = object.into_volume().into_ndarray::<f32>()?;
    Ok(data.iter().all(|value| *value == 0.0))
}
