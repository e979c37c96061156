use std::collections::BTreeMap;
use std::path::PathBuf;

use assert_matches::assert_matches;
use rstest::rstest;

use crate::error::BratsError;
use crate::tests::common;
use crate::types::{Modality, ModalityRule};
use crate::utils::staging::{
    discover_subjects, format_subject_id, standardize_batch_inputs, standardize_single_inputs,
};

#[rstest]
#[case("BraTS-GLI-{id:05d}-000", 0, "BraTS-GLI-00000-000")]
#[case("BraTS-GLI-{id:05d}-000", 42, "BraTS-GLI-00042-000")]
#[case("BraTS-GoAT-{id:05d}", 7, "BraTS-GoAT-00007")]
#[case("BraTS-MEN-RT-{id:04d}-1", 3, "BraTS-MEN-RT-0003-1")]
#[case("subject-{id}", 12, "subject-12")]
#[case("no-placeholder", 5, "no-placeholder")]
fn subject_id_formatting(#[case] schema: &str, #[case] index: usize, #[case] expected: &str) {
    assert_eq!(format_subject_id(schema, index), expected);
}

#[rstest]
fn single_inputs_are_copied_into_the_canonical_layout() {
    let source = tempfile::tempdir().unwrap();
    let staged = tempfile::tempdir().unwrap();

    let mut inputs = BTreeMap::new();
    for (modality, name) in [(Modality::T1c, "a"), (Modality::T1n, "b"), (Modality::T2f, "c"), (Modality::T2w, "d")]
    {
        let path = source.path().join(format!("{name}.nii.gz"));
        std::fs::write(&path, name).unwrap();
        inputs.insert(modality, path);
    }

    standardize_single_inputs(staged.path(), "BraTS-GLI-00000-000", &inputs, '-').unwrap();

    let subject_dir = staged.path().join("BraTS-GLI-00000-000");
    for (modality, content) in [("t1c", "a"), ("t1n", "b"), ("t2f", "c"), ("t2w", "d")] {
        let staged_file = subject_dir.join(format!("BraTS-GLI-00000-000-{modality}.nii.gz"));
        assert_eq!(std::fs::read(&staged_file).unwrap(), content.as_bytes());
    }
}

#[rstest]
fn repeated_standardization_yields_identical_staged_files() {
    let source = tempfile::tempdir().unwrap();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    let mut inputs = BTreeMap::new();
    for (modality, content) in [(Modality::T1c, "aa"), (Modality::T1n, "bb"), (Modality::T2f, "cc"), (Modality::T2w, "dd")]
    {
        let path = source.path().join(format!("{modality}.nii.gz"));
        std::fs::write(&path, content).unwrap();
        inputs.insert(modality, path);
    }

    standardize_single_inputs(first.path(), "BraTS-GLI-00000-000", &inputs, '-').unwrap();
    standardize_single_inputs(second.path(), "BraTS-GLI-00000-000", &inputs, '-').unwrap();
    // re-running into an already staged root must also leave identical files
    standardize_single_inputs(first.path(), "BraTS-GLI-00000-000", &inputs, '-').unwrap();

    for modality in common::STRUCTURAL {
        let staged = format!("BraTS-GLI-00000-000/BraTS-GLI-00000-000-{modality}.nii.gz");
        assert_eq!(
            std::fs::read(first.path().join(&staged)).unwrap(),
            std::fs::read(second.path().join(&staged)).unwrap()
        );
    }
}

#[rstest]
fn batch_inputs_build_the_internal_to_external_name_map() {
    let data = tempfile::tempdir().unwrap();
    let staged = tempfile::tempdir().unwrap();
    common::write_subject(data.path(), "patient_a", &common::STRUCTURAL);
    common::write_subject(data.path(), "patient_b", &common::STRUCTURAL);

    let subjects = discover_subjects(data.path()).unwrap();
    assert_eq!(subjects.len(), 2);

    let name_map = standardize_batch_inputs(
        staged.path(),
        &subjects,
        "BraTS-GLI-{id:05d}-000",
        '-',
        ModalityRule::AllFour,
    )
    .unwrap();

    assert_eq!(name_map.len(), 2);
    assert!(name_map.contains_key("BraTS-GLI-00000-000"));
    assert!(name_map.contains_key("BraTS-GLI-00001-000"));
    let mut externals: Vec<&str> = name_map.values().map(String::as_str).collect();
    externals.sort_unstable();
    assert_eq!(externals, vec!["patient_a", "patient_b"]);

    for internal in name_map.keys() {
        let subject_dir = staged.path().join(internal);
        assert!(subject_dir.join(format!("{internal}-t1c.nii.gz")).exists());
    }
}

#[rstest]
fn batch_subject_with_a_missing_modality_fails() {
    let data = tempfile::tempdir().unwrap();
    let staged = tempfile::tempdir().unwrap();
    common::write_subject(data.path(), "patient_a", &["t1c", "t1n", "t2f"]);

    let subjects: Vec<PathBuf> = vec![data.path().join("patient_a")];
    let result = standardize_batch_inputs(
        staged.path(),
        &subjects,
        "BraTS-GLI-{id:05d}-000",
        '-',
        ModalityRule::AllFour,
    );
    assert_matches!(result, Err(BratsError::Io(_)));
}

#[rstest]
fn subject_discovery_ignores_stray_files() {
    let data = tempfile::tempdir().unwrap();
    common::write_subject(data.path(), "patient_a", &common::STRUCTURAL);
    std::fs::write(data.path().join("notes.txt"), b"not a subject").unwrap();

    let subjects = discover_subjects(data.path()).unwrap();
    assert_eq!(subjects.len(), 1);
    assert!(subjects[0].ends_with("patient_a"));
}
