use std::path::Path;

use anyhow::Result;

use crate::{DeviceMap, ImagePipeline, PipelineSettings, SchedulerKind, SdVersion, WeightDType};

/// Everything a loader needs besides the checkpoint location.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Weight variant, e.g. `fp16` selects `*.fp16.safetensors` when present.
    pub revision: String,
    pub dtype: WeightDType,
    pub scheduler: SchedulerKind,
    pub sd_version: SdVersion,
    pub use_flash_attn: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            revision: settings.revision.clone(),
            dtype: settings.dtype,
            scheduler: settings.scheduler,
            sd_version: settings.sd_version,
            use_flash_attn: settings.use_flash_attn,
        }
    }
}

/// Builds a pipeline from a pretrained checkpoint directory.
pub trait PipelineLoader {
    type Pipeline: ImagePipeline;

    fn load(
        checkpoint_dir: &Path,
        options: &PipelineOptions,
        device_map: DeviceMap,
    ) -> Result<Self::Pipeline>
    where
        Self: Sized;
}
