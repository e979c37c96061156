/// Inference device selection passed through to whichever backend runs the
/// job. The device id is advisory metadata; nothing prevents two concurrent
/// jobs from targeting the same GPU.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// CUDA device selector, e.g. `"0"` or `"0,1"`.
    pub cuda_devices: String,
    /// Run on CPU even when a GPU is present.
    pub force_cpu: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { cuda_devices: "0".to_string(), force_cpu: false }
    }
}

/// Backend-neutral GPU request produced by device negotiation. An empty
/// request list means CPU execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuRequest {
    pub device_ids: Vec<String>,
}
