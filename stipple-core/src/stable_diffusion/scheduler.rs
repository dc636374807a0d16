use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_transformers::models::stable_diffusion::{
    ddim::DDIMSchedulerConfig,
    euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig,
    schedulers::{BetaSchedule, PredictionType, SchedulerConfig},
};
use serde::Deserialize;

use crate::SchedulerKind;

/// The trained noise schedule, as stored in a checkpoint's `scheduler_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoiseSchedule {
    #[serde(rename = "_class_name", default)]
    pub class_name: Option<String>,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: String,
    #[serde(default = "default_prediction_type")]
    pub prediction_type: String,
    #[serde(default = "default_steps_offset")]
    pub steps_offset: usize,
    #[serde(default = "default_train_timesteps")]
    pub num_train_timesteps: usize,
}

fn default_beta_start() -> f64 {
    0.00085
}

fn default_beta_end() -> f64 {
    0.012
}

fn default_beta_schedule() -> String {
    "scaled_linear".to_string()
}

fn default_prediction_type() -> String {
    "epsilon".to_string()
}

fn default_steps_offset() -> usize {
    1
}

fn default_train_timesteps() -> usize {
    1000
}

impl Default for NoiseSchedule {
    fn default() -> Self {
        Self {
            class_name: None,
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
            beta_schedule: default_beta_schedule(),
            prediction_type: default_prediction_type(),
            steps_offset: default_steps_offset(),
            num_train_timesteps: default_train_timesteps(),
        }
    }
}

impl NoiseSchedule {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn beta_schedule(&self) -> Result<BetaSchedule> {
        Ok(match self.beta_schedule.as_str() {
            "linear" => BetaSchedule::Linear,
            "scaled_linear" => BetaSchedule::ScaledLinear,
            "squaredcos_cap_v2" => BetaSchedule::SquaredcosCapV2,
            other => bail!("unsupported beta schedule `{other}`"),
        })
    }

    fn prediction_type(&self) -> Result<PredictionType> {
        Ok(match self.prediction_type.as_str() {
            "epsilon" => PredictionType::Epsilon,
            "v_prediction" => PredictionType::VPrediction,
            "sample" => PredictionType::Sample,
            other => bail!("unsupported prediction type `{other}`"),
        })
    }

    /// Builds `kind` from this schedule, replacing whichever scheduler the
    /// checkpoint was exported with.
    pub fn scheduler_config(&self, kind: SchedulerKind) -> Result<Box<dyn SchedulerConfig>> {
        let beta_schedule = self.beta_schedule()?;
        let prediction_type = self.prediction_type()?;
        let config: Box<dyn SchedulerConfig> = match kind {
            SchedulerKind::Ddim => Box::new(DDIMSchedulerConfig {
                beta_start: self.beta_start,
                beta_end: self.beta_end,
                beta_schedule,
                prediction_type,
                steps_offset: self.steps_offset,
                train_timesteps: self.num_train_timesteps,
                ..Default::default()
            }),
            SchedulerKind::EulerAncestral => Box::new(EulerAncestralDiscreteSchedulerConfig {
                beta_start: self.beta_start,
                beta_end: self.beta_end,
                beta_schedule,
                prediction_type,
                steps_offset: self.steps_offset,
                train_timesteps: self.num_train_timesteps,
                ..Default::default()
            }),
        };
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_transformers::models::stable_diffusion::schedulers::Scheduler;

    #[test]
    fn reads_diffusers_config() {
        let schedule: NoiseSchedule = serde_json::from_str(
            r#"{
                "_class_name": "PNDMScheduler",
                "_diffusers_version": "0.8.0",
                "beta_end": 0.012,
                "beta_schedule": "scaled_linear",
                "beta_start": 0.00085,
                "clip_sample": false,
                "num_train_timesteps": 1000,
                "prediction_type": "v_prediction",
                "set_alpha_to_one": false,
                "skip_prk_steps": true,
                "steps_offset": 1,
                "trained_betas": null
            }"#,
        )
        .unwrap();
        assert_eq!(schedule.class_name.as_deref(), Some("PNDMScheduler"));
        assert_eq!(schedule.prediction_type, "v_prediction");
        assert_eq!(schedule.num_train_timesteps, 1000);
    }

    #[test]
    fn builds_requested_scheduler() {
        let schedule = NoiseSchedule::default();
        for kind in [SchedulerKind::Ddim, SchedulerKind::EulerAncestral] {
            let scheduler = schedule.scheduler_config(kind).unwrap().build(20).unwrap();
            assert!(!scheduler.timesteps().is_empty());
        }
    }

    #[test]
    fn rejects_unknown_schedule() {
        let schedule = NoiseSchedule {
            beta_schedule: "exponential".to_string(),
            ..Default::default()
        };
        assert!(schedule.scheduler_config(SchedulerKind::Ddim).is_err());
    }
}
