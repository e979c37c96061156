use std::collections::BTreeMap;

use assert_matches::assert_matches;
use tracing_test::traced_test;

use crate::core::client::BackendError;
use crate::core::validation::{input_shape_check, sanity_check_output};
use crate::tests::common;
use crate::types::{Modality, NameMap};

#[test]
fn complete_output_passes_the_sanity_check() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for subject in ["BraTS-GLI-00000-000", "BraTS-GLI-00001-000"] {
        std::fs::create_dir(input.path().join(subject)).unwrap();
        common::write_volume(&output.path().join(format!("{subject}.nii.gz")), 1.0);
    }

    sanity_check_output(input.path(), output.path(), "log", None).unwrap();
}

#[test]
fn missing_outputs_fail_the_sanity_check() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir(input.path().join("BraTS-GLI-00000-000")).unwrap();
    std::fs::create_dir(input.path().join("BraTS-GLI-00001-000")).unwrap();
    common::write_volume(&output.path().join("BraTS-GLI-00000-000.nii.gz"), 1.0);

    let result = sanity_check_output(input.path(), output.path(), "container log", None);
    assert_matches!(result, Err(BackendError::IncompleteOutput { expected: 2, got: 1, .. }));
}

#[test]
fn incidental_input_files_are_not_counted() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir(input.path().join("BraTS-GLI-00000-000")).unwrap();
    // algorithms sometimes leave caches or logs next to the subjects
    std::fs::write(input.path().join("runtime.log"), b"noise").unwrap();
    common::write_volume(&output.path().join("BraTS-GLI-00000-000.nii.gz"), 1.0);

    sanity_check_output(input.path(), output.path(), "log", None).unwrap();
}

#[traced_test]
#[test]
fn all_zero_outputs_warn_with_the_external_subject_name() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir(input.path().join("BraTS-GLI-00000-000")).unwrap();
    common::write_volume(&output.path().join("BraTS-GLI-00000-000.nii.gz"), 0.0);

    let name_map: NameMap =
        [("BraTS-GLI-00000-000".to_string(), "patient_a".to_string())].into_iter().collect();
    sanity_check_output(input.path(), output.path(), "log", Some(&name_map)).unwrap();
    assert!(logs_contain("output file for subject patient_a contains only zeros"));
}

#[traced_test]
#[test]
fn non_reference_shapes_warn_but_do_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t1c.nii.gz");
    common::write_volume(&path, 1.0);

    let inputs: BTreeMap<_, _> = [(Modality::T1c, path)].into_iter().collect();
    input_shape_check(&inputs);
    assert!(logs_contain("input images do not have the default shape"));
}
