use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::core::validation;
use crate::error::{BratsError, BratsResult};
use crate::types::{ModalityRule, NameMap};
use crate::types::Modality;

/// The two ephemeral staging directories owned by one job. Removed
/// unconditionally on drop; removal failure only warns, since container
/// processes may leave files owned by another uid.
#[derive(Debug)]
pub struct ScratchDirs {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ScratchDirs {
    pub fn create() -> std::io::Result<Self> {
        let input = tempfile::Builder::new().prefix("brats-data-").tempdir()?.into_path();
        let output = tempfile::Builder::new().prefix("brats-output-").tempdir()?.into_path();
        Ok(Self { input, output })
    }
}

impl Drop for ScratchDirs {
    fn drop(&mut self) {
        for dir in [&self.input, &self.output] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!(
                    "failed to remove temporary folder {}, most likely caused by the container's \
                     permission management: {e}",
                    dir.display()
                );
            }
        }
    }
}

/// Formats an id-schema template (`BraTS-GLI-{id:05d}-000`) with a 0-based
/// subject index. Supports plain `{id}` and zero-padded `{id:0Nd}` slots.
pub fn format_subject_id(schema: &str, index: usize) -> String {
    let Some(start) = schema.find("{id") else {
        return schema.to_string();
    };
    let Some(end) = schema[start..].find('}').map(|offset| start + offset) else {
        return schema.to_string();
    };
    let spec = &schema[start + 3..end];
    let formatted = spec
        .strip_prefix(":0")
        .and_then(|s| s.strip_suffix('d'))
        .and_then(|width| width.parse::<usize>().ok())
        .map(|width| format!("{index:0width$}"))
        .unwrap_or_else(|| index.to_string());
    format!("{}{}{}", &schema[..start], formatted, &schema[end + 1..])
}

/// Copies the supplied modality files into the canonical per-subject layout
/// `root/{subject_id}/{subject_id}{sep}{modality}.nii.gz`, then runs the
/// non-blocking shape sanity check.
pub fn standardize_single_inputs(
    data_folder: &Path,
    subject_id: &str,
    inputs: &BTreeMap<Modality, PathBuf>,
    subject_modality_separator: char,
) -> BratsResult<()> {
    let subject_folder = data_folder.join(subject_id);
    std::fs::create_dir_all(&subject_folder)?;
    for (modality, source) in inputs {
        let target = subject_folder.join(format!("{subject_id}{subject_modality_separator}{modality}.nii.gz"));
        std::fs::copy(source, &target).map_err(|e| {
            error!("error while standardizing {modality} image {}: {e}", source.display());
            error!(
                "for batch processing make sure the input files follow the expected layout, \
                 e.g. A/A-t1c.nii.gz, A/A-t1n.nii.gz, A/A-t2f.nii.gz, A/A-t2w.nii.gz"
            );
            e
        })?;
    }
    validation::input_shape_check(inputs);
    Ok(())
}

/// Standardizes a list of subject directories, assigning each subject an
/// internal id from the schema applied to its positional index. Returns the
/// internal->external name map used to reattach user names afterwards.
///
/// Subjects are processed in the order given; for batch discovery that is
/// whatever the directory listing yielded, no sort is applied.
pub fn standardize_batch_inputs(
    data_folder: &Path,
    subjects: &[PathBuf],
    input_name_schema: &str,
    subject_modality_separator: char,
    rule: ModalityRule,
) -> BratsResult<NameMap> {
    let mut name_map = NameMap::new();
    for (index, subject) in subjects.iter().enumerate() {
        let external_name = subject
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| BratsError::InvalidInput(format!("invalid subject directory {}", subject.display())))?;
        let internal_name = format_subject_id(input_name_schema, index);
        let inputs = rule.batch_inputs(subject, &external_name)?;
        standardize_single_inputs(data_folder, &internal_name, &inputs, subject_modality_separator)?;
        name_map.insert(internal_name, external_name);
    }
    Ok(name_map)
}

/// Lists the subject subdirectories of a batch input root, in directory
/// order.
pub fn discover_subjects(data_folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    Ok(std::fs::read_dir(data_folder)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect())
}
