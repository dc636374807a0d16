use std::str::FromStr;

use candle_core::{DType, Device};
use serde::Serialize;

use crate::AdapterError;

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Noise schedulers the pipeline can be switched to.
///
/// Accepts short names (`ddim`, `euler_ancestral`) as well as the class names
/// written into diffusers `scheduler_config.json` files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Ddim,
    #[default]
    EulerAncestral,
}

impl SchedulerKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = normalize(name);
        if name.starts_with("DDIM") {
            Some(SchedulerKind::Ddim)
        } else if name.starts_with("EULERANCESTRAL") || name == "EULERA" {
            Some(SchedulerKind::EulerAncestral)
        } else {
            None
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| AdapterError::InvalidParameter {
            key: "scheduler".to_string(),
            value: s.to_string(),
        })
    }
}

/// Stable Diffusion architecture family of the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SdVersion {
    #[serde(rename = "v1_5")]
    V1_5,
    #[default]
    #[serde(rename = "v2_1")]
    V2_1,
}

impl FromStr for SdVersion {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "V15" | "15" => Ok(SdVersion::V1_5),
            "V21" | "21" => Ok(SdVersion::V2_1),
            _ => Err(AdapterError::InvalidParameter {
                key: "sd_version".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Precision the weights are loaded in on an accelerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDType {
    #[default]
    F16,
    BF16,
    F32,
}

impl FromStr for WeightDType {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "FP16" | "F16" | "FLOAT16" | "HALF" => Ok(WeightDType::F16),
            "BF16" | "BFLOAT16" => Ok(WeightDType::BF16),
            "FP32" | "F32" | "FLOAT32" | "FLOAT" => Ok(WeightDType::F32),
            _ => Err(AdapterError::InvalidParameter {
                key: "dtype".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl WeightDType {
    /// Half precision is only used on accelerators; CPU always runs in f32.
    pub fn for_device(&self, device: &Device) -> DType {
        if device.is_cpu() {
            return DType::F32;
        }
        match self {
            WeightDType::F16 => DType::F16,
            WeightDType::BF16 => DType::BF16,
            WeightDType::F32 => DType::F32,
        }
    }
}
