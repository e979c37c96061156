use assert_matches::assert_matches;
use rstest::rstest;

use crate::config::{load_algorithms, select_algorithm, ConfigError, StagingProtocol};
use crate::tests::common;
use crate::utils::constants::meta_dir;

const MINIMAL_CATALOG: &str = r#"
algorithms:
  BraTS23_1:
    meta:
      authors: Jane Doe, et al.
      paper: https://arxiv.org/abs/0000.00000
      challenge: Adult Glioma Segmentation
      challenge_manuscript: https://arxiv.org/abs/1111.11111
      rank: 1st
      year: 2023
    run_args:
      docker_image: brainles/test-algorithm:latest
      input_name_schema: "BraTS-GLI-{id:05d}-000"
      parameters_file: true
      requires_root: false
    additional_files:
      record_id: "123"
"#;

fn write_catalog(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.yml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[rstest]
fn minimal_catalog_loads_with_defaults() {
    let (_dir, path) = write_catalog(MINIMAL_CATALOG);
    let algorithms = load_algorithms(&path).unwrap();
    assert_eq!(algorithms.len(), 1);

    let descriptor = &algorithms["BraTS23_1"];
    assert_eq!(descriptor.run_args.shm_size, "2gb");
    assert_eq!(descriptor.run_args.subject_modality_separator, '-');
    assert!(!descriptor.run_args.cpu_compatible);
    let additional = descriptor.additional_files.as_ref().unwrap();
    assert_eq!(additional.param_name, vec!["weights".to_string()]);
    assert!(additional.param_path.is_none());
}

#[rstest]
fn unknown_algorithm_key_is_rejected() {
    let (_dir, path) = write_catalog(MINIMAL_CATALOG);
    let result = select_algorithm(&path, "BraTS99_1");
    assert_matches!(result, Err(ConfigError::UnknownAlgorithm { key, .. }) if key == "BraTS99_1");
}

#[rstest]
fn missing_catalog_file_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_algorithms(&dir.path().join("nope.yml"));
    assert_matches!(result, Err(ConfigError::NotFound(_)));
}

#[rstest]
fn malformed_catalog_reports_invalid() {
    let (_dir, path) = write_catalog("algorithms: [1, 2, 3]");
    assert_matches!(load_algorithms(&path), Err(ConfigError::InvalidCatalog { .. }));
}

#[rstest]
fn unknown_catalog_fields_are_rejected() {
    let catalog = MINIMAL_CATALOG.replace("record_id: \"123\"", "record_id: \"123\"\n      surprise: true");
    let (_dir, path) = write_catalog(&catalog);
    assert_matches!(load_algorithms(&path), Err(ConfigError::InvalidCatalog { .. }));
}

/// Every bundled catalog must deserialize and hold at least one entry.
#[rstest]
fn bundled_catalogs_deserialize() {
    let mut seen = 0;
    for entry in std::fs::read_dir(meta_dir()).unwrap().flatten() {
        let algorithms = load_algorithms(&entry.path()).unwrap();
        assert!(!algorithms.is_empty(), "empty catalog: {}", entry.path().display());
        seen += 1;
    }
    assert!(seen >= 8);
}

#[rstest]
#[case(2023, StagingProtocol::Legacy)]
#[case(2024, StagingProtocol::Legacy)]
#[case(2025, StagingProtocol::Modern)]
fn staging_protocol_follows_the_submission_year(#[case] year: u16, #[case] expected: StagingProtocol) {
    assert_eq!(common::descriptor_with_year(year).staging_protocol(), expected);
}

#[rstest]
#[case("brainles/brats23_nvauto:latest", "brats23_nvauto")]
#[case("brats23_nvauto", "brats23_nvauto")]
#[case("ghcr.io/brainles/algo:1.2", "algo")]
fn image_repository_strips_registry_and_tag(#[case] image: &str, #[case] expected: &str) {
    let mut descriptor = common::descriptor_with_year(2023);
    descriptor.run_args.docker_image = image.to_string();
    assert_eq!(descriptor.image_repository(), expected);
}

#[rstest]
#[case("2gb", Some(2 * 1024 * 1024 * 1024))]
#[case("512mb", Some(512 * 1024 * 1024))]
#[case("bogus", None)]
fn shm_size_parses_to_bytes(#[case] shm_size: &str, #[case] expected: Option<i64>) {
    let mut descriptor = common::descriptor_with_year(2023);
    descriptor.run_args.shm_size = shm_size.to_string();
    assert_eq!(descriptor.shm_size_bytes(), expected);
}

#[rstest]
fn shm_size_converts_to_cluster_quantity() {
    let mut descriptor = common::descriptor_with_year(2023);
    descriptor.run_args.shm_size = "32gb".to_string();
    assert_eq!(descriptor.shm_size_quantity(), "32Gi");
}
