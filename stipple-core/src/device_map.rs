use serde::{Deserialize, Serialize};

/// Kind of model instance the host asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceKind {
    Cpu,
    Gpu,
}

/// Where the pipeline weights are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl DeviceMap {
    pub fn for_instance(kind: InstanceKind, device_id: usize) -> Self {
        match kind {
            InstanceKind::Cpu => Self::ForceCpu,
            InstanceKind::Gpu => Self::Ordinal(device_id),
        }
    }
}
