use std::{collections::HashMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    AdapterError, DataType, DeviceMap, InstanceKind, Result, SchedulerKind, SdVersion,
    WeightDType,
};

pub const DEFAULT_CHECKPOINT_DIR: &str =
    "tmp/diffusers-pipeline/stabilityai/stable-diffusion-v2-1-base";
pub const DEFAULT_CACHE_DIR: &str = "tmp/hub";
pub const DEFAULT_REVISION: &str = "fp16";
pub const DEFAULT_IMAGE_SIZE: usize = 512;
pub const DEFAULT_INFERENCE_STEPS: usize = 50;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

/// Model configuration as handed over by the host runtime, in its JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub max_batch_size: u32,
    #[serde(default)]
    pub input: Vec<TensorConfig>,
    #[serde(default)]
    pub output: Vec<TensorConfig>,
    #[serde(default)]
    pub parameters: HashMap<String, ParameterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorConfig {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, deserialize_with = "deserialize_dims")]
    pub dims: Vec<i64>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub string_value: String,
}

// The host serializes int64 dims either as numbers or as strings.
fn deserialize_dims<'de, D>(deserializer: D) -> std::result::Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Dim {
        Int(i64),
        Str(String),
    }

    Vec::<Dim>::deserialize(deserializer)?
        .into_iter()
        .map(|dim| match dim {
            Dim::Int(v) => Ok(v),
            Dim::Str(s) => s.parse().map_err(serde::de::Error::custom),
        })
        .collect()
}

impl ModelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn output_config_by_name(&self, name: &str) -> Option<&TensorConfig> {
        self.output.iter().find(|o| o.name == name)
    }

    pub fn input_config_by_name(&self, name: &str) -> Option<&TensorConfig> {
        self.input.iter().find(|i| i.name == name)
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(|p| p.string_value.as_str())
    }

    fn parse_parameter<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.parameter(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| AdapterError::InvalidParameter {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// Pipeline settings read from the model config `parameters`, with defaults
/// matching the stock Stable Diffusion 2.1 base deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSettings {
    /// Checkpoint directory, relative to the model directory unless absolute.
    pub checkpoint_dir: PathBuf,
    /// Download cache for checkpoint files, relative to the model directory unless absolute.
    pub cache_dir: PathBuf,
    pub revision: String,
    pub dtype: WeightDType,
    pub scheduler: SchedulerKind,
    pub sd_version: SdVersion,
    pub height: usize,
    pub width: usize,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub use_flash_attn: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            revision: DEFAULT_REVISION.to_string(),
            dtype: WeightDType::F16,
            scheduler: SchedulerKind::default(),
            sd_version: SdVersion::default(),
            height: DEFAULT_IMAGE_SIZE,
            width: DEFAULT_IMAGE_SIZE,
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            use_flash_attn: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            checkpoint_dir: config.parse_parameter("checkpoint_dir", defaults.checkpoint_dir)?,
            cache_dir: config.parse_parameter("cache_dir", defaults.cache_dir)?,
            revision: config.parse_parameter("revision", defaults.revision)?,
            dtype: config.parse_parameter("dtype", defaults.dtype)?,
            scheduler: config.parse_parameter("scheduler", defaults.scheduler)?,
            sd_version: config.parse_parameter("sd_version", defaults.sd_version)?,
            height: config.parse_parameter("height", defaults.height)?,
            width: config.parse_parameter("width", defaults.width)?,
            num_inference_steps: config
                .parse_parameter("num_inference_steps", defaults.num_inference_steps)?,
            guidance_scale: config.parse_parameter("guidance_scale", defaults.guidance_scale)?,
            use_flash_attn: config.parse_parameter("use_flash_attn", defaults.use_flash_attn)?,
        };

        for (key, value) in [("height", settings.height), ("width", settings.width)] {
            if value == 0 || value % 8 != 0 {
                return Err(AdapterError::InvalidParameter {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if settings.num_inference_steps == 0 {
            return Err(AdapterError::InvalidParameter {
                key: "num_inference_steps".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(settings)
    }
}

/// Arguments passed by the host to `ServedModel::initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeArgs {
    /// Model configuration, serialized as JSON.
    pub model_config: String,
    /// Directory of this model inside the model repository.
    pub model_repository: PathBuf,
    pub model_name: String,
    pub model_version: u64,
    pub model_instance_kind: InstanceKind,
    pub model_instance_device_id: usize,
}

impl InitializeArgs {
    pub fn device_map(&self) -> DeviceMap {
        DeviceMap::for_instance(self.model_instance_kind, self.model_instance_device_id)
    }

    pub fn version_dir(&self) -> PathBuf {
        self.model_repository.join(self.model_version.to_string())
    }

    /// Resolves a configured path against the model directory.
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_repository.join(path)
        }
    }
}
