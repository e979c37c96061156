use assert_matches::assert_matches;
use rstest::rstest;

use crate::core::client::command::{build_command_args, parameters_file, volume_mappings};
use crate::core::client::{resolve_device_requests, BackendError};
use crate::tests::common;
use crate::types::GpuRequest;
use crate::utils::constants::{
    dummy_parameters_file, INPUT_MOUNT, MLCUBE_ADDITIONAL_FILES_MOUNT, MLCUBE_INPUT_MOUNT,
    MLCUBE_OUTPUT_MOUNT, MLCUBE_PARAMETERS_MOUNT, OUTPUT_MOUNT,
};

#[rstest]
fn gpu_execution_is_the_default_when_cuda_is_available() {
    let request = resolve_device_requests(true, false, false, "0,1").unwrap();
    assert_eq!(request, Some(GpuRequest { device_ids: vec!["0,1".to_string()] }));
}

#[rstest]
#[case(false, false)]
#[case(false, true)]
#[case(true, true)]
fn cpu_compatible_algorithms_fall_back_to_cpu(#[case] cuda: bool, #[case] force_cpu: bool) {
    assert_eq!(resolve_device_requests(cuda, force_cpu, true, "0").unwrap(), None);
}

#[rstest]
fn missing_gpu_on_a_gpu_only_algorithm_is_fatal() {
    let result = resolve_device_requests(false, false, false, "0");
    assert_matches!(result, Err(BackendError::NoGpuAvailable));
}

#[rstest]
fn forcing_cpu_on_a_gpu_only_algorithm_is_fatal() {
    let result = resolve_device_requests(true, true, false, "0");
    assert_matches!(result, Err(BackendError::CpuForcedNotSupported));
}

#[rstest]
fn legacy_volume_layout_uses_the_four_sequential_slots() {
    let descriptor = common::descriptor_with_year(2023);
    let mappings = volume_mappings(
        &descriptor,
        std::path::Path::new("/host/input"),
        std::path::Path::new("/host/additional"),
        std::path::Path::new("/host/output"),
    );
    let containers: Vec<&str> = mappings.iter().map(|m| m.container.as_str()).collect();
    assert_eq!(
        containers,
        vec![MLCUBE_INPUT_MOUNT, MLCUBE_ADDITIONAL_FILES_MOUNT, MLCUBE_OUTPUT_MOUNT, MLCUBE_PARAMETERS_MOUNT]
    );
    assert_eq!(mappings[0].bind(), format!("/host/input:{MLCUBE_INPUT_MOUNT}"));
}

#[rstest]
fn modern_volume_layout_uses_plain_input_output_binds() {
    let descriptor = common::descriptor_with_year(2025);
    let mappings = volume_mappings(
        &descriptor,
        std::path::Path::new("/host/input"),
        std::path::Path::new("/host/additional"),
        std::path::Path::new("/host/output"),
    );
    let containers: Vec<&str> = mappings.iter().map(|m| m.container.as_str()).collect();
    assert_eq!(containers, vec![INPUT_MOUNT, OUTPUT_MOUNT]);
}

#[rstest]
fn command_args_name_every_additional_file_parameter() {
    let descriptor =
        common::descriptor_with_additional_files(&["weights", "config"], Some(&["w", "cfg/c.json"]));
    let args = build_command_args(
        &descriptor,
        MLCUBE_INPUT_MOUNT,
        MLCUBE_ADDITIONAL_FILES_MOUNT,
        MLCUBE_OUTPUT_MOUNT,
        MLCUBE_PARAMETERS_MOUNT,
    );
    assert_eq!(
        args,
        vec![
            format!("--data_path={MLCUBE_INPUT_MOUNT}"),
            format!("--output_path={MLCUBE_OUTPUT_MOUNT}"),
            format!("--weights={MLCUBE_ADDITIONAL_FILES_MOUNT}/w"),
            format!("--config={MLCUBE_ADDITIONAL_FILES_MOUNT}/cfg/c.json"),
        ]
    );
}

#[rstest]
fn command_args_reference_the_parameters_file_when_required() {
    let mut descriptor = common::descriptor_with_year(2023);
    descriptor.run_args.parameters_file = true;
    let args = build_command_args(&descriptor, "/data/input", "", "/data/output", "/data/parameters");
    assert!(args.contains(&"--parameters_file=/data/parameters/dummy.yml".to_string()));
}

#[rstest]
fn parameters_file_falls_back_to_the_bundled_dummy() {
    let mut descriptor = common::descriptor_with_year(2023);
    assert_eq!(parameters_file(&descriptor), None);

    descriptor.run_args.parameters_file = true;
    // no dedicated file ships for the test image repository
    assert_eq!(parameters_file(&descriptor), Some(dummy_parameters_file()));
}
