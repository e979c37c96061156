use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{BratsError, BratsResult};

/// The inference task a challenge solves. Determines the output naming
/// convention the orchestrator uses to locate algorithm results.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Task {
    Segmentation,
    Inpainting,
    /// Cross-modality synthesis: the produced filename embeds the synthesized
    /// modality, so there is no fixed output name.
    MissingMri,
}

/// One MRI sequence type as named in standardized filenames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Modality {
    T1c,
    T1n,
    T2f,
    T2w,
    /// Voided native T1 used by the inpainting task.
    T1nVoided,
    /// Binary mask marking the region to inpaint.
    Mask,
}

impl Modality {
    pub const SEGMENTATION: [Modality; 4] = [Modality::T1c, Modality::T1n, Modality::T2f, Modality::T2w];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::T1c => "t1c",
            Modality::T1n => "t1n",
            Modality::T2f => "t2f",
            Modality::T2w => "t2w",
            Modality::T1nVoided => "t1n-voided",
            Modality::Mask => "mask",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which modality files a challenge/algorithm combination requires. Enforced
/// before any filesystem work happens.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModalityRule {
    /// All four structural modalities (t1c, t1n, t2f, t2w).
    AllFour,
    /// Only the contrast-enhanced T1.
    OnlyT1c,
    /// Voided T1 plus inpainting mask.
    InpaintingPair,
    /// Exactly three of the four structural modalities; the missing one is
    /// synthesized.
    ThreeOfFour,
}

impl ModalityRule {
    /// Validates a caller-supplied modality set against this rule, naming the
    /// expected arity in the error before any file I/O occurs.
    pub fn validate(&self, inputs: &BTreeMap<Modality, PathBuf>) -> BratsResult<()> {
        match self {
            ModalityRule::AllFour => {
                Self::require_exactly(inputs, &Modality::SEGMENTATION, "all four modalities (t1c, t1n, t2f, t2w)")
            }
            ModalityRule::OnlyT1c => {
                Self::require_exactly(inputs, &[Modality::T1c], "exactly one modality (t1c)")
            }
            ModalityRule::InpaintingPair => Self::require_exactly(
                inputs,
                &[Modality::T1nVoided, Modality::Mask],
                "a voided t1n image and a mask",
            ),
            ModalityRule::ThreeOfFour => {
                let structural =
                    inputs.keys().filter(|m| Modality::SEGMENTATION.contains(m)).count();
                if structural != 3 || inputs.len() != 3 {
                    return Err(BratsError::InvalidInput(format!(
                        "exactly 3 of the 4 modalities (t1c, t1n, t2f, t2w) are required to synthesize the missing one, got {}",
                        inputs.len()
                    )));
                }
                Ok(())
            }
        }
    }

    fn require_exactly(
        inputs: &BTreeMap<Modality, PathBuf>,
        expected: &[Modality],
        description: &str,
    ) -> BratsResult<()> {
        let matches = expected.iter().all(|m| inputs.contains_key(m));
        if !matches || inputs.len() != expected.len() {
            return Err(BratsError::InvalidInput(format!(
                "the selected algorithm requires {description}, got {} input(s)",
                inputs.len()
            )));
        }
        Ok(())
    }

    /// Builds the modality->file mapping for one batch subject directory,
    /// following the `{subject}-{modality}.nii.gz` convention.
    pub fn batch_inputs(
        &self,
        subject_dir: &Path,
        subject_name: &str,
    ) -> BratsResult<BTreeMap<Modality, PathBuf>> {
        let file = |m: Modality| subject_dir.join(format!("{subject_name}-{m}.nii.gz"));
        let inputs: BTreeMap<Modality, PathBuf> = match self {
            ModalityRule::AllFour => Modality::SEGMENTATION.iter().map(|m| (*m, file(*m))).collect(),
            ModalityRule::OnlyT1c => [(Modality::T1c, file(Modality::T1c))].into_iter().collect(),
            ModalityRule::InpaintingPair => [
                (Modality::T1nVoided, file(Modality::T1nVoided)),
                (Modality::Mask, file(Modality::Mask)),
            ]
            .into_iter()
            .collect(),
            ModalityRule::ThreeOfFour => Modality::SEGMENTATION
                .iter()
                .map(|m| (*m, file(*m)))
                .filter(|(_, path)| path.exists())
                .collect(),
        };
        self.validate(&inputs)?;
        Ok(inputs)
    }
}
