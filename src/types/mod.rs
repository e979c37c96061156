pub mod backend;
pub mod challenge;
pub mod device;
pub mod retry;

use std::collections::BTreeMap;

pub use backend::{ApptainerSettings, Backend, ClientOptions, KubernetesSettings};
pub use challenge::{Modality, ModalityRule, Task};
pub use device::{DeviceConfig, GpuRequest};
pub use retry::RetryPolicy;

/// Mapping from internally generated canonical subject ids to the external
/// subject names supplied by the caller. Built fresh per batch job and used
/// only to reverse the renaming applied for container compatibility.
pub type NameMap = BTreeMap<String, String>;
