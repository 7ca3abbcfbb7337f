//! Sampler description shared by the loader and the backends.
//!
//! `SchedulerSettings` mirrors the `scheduler/scheduler_config.json` file of a
//! diffusers checkpoint. `SchedulerSpec` is the validated form a backend can
//! build a sampler from.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unsupported beta schedule '{0}'")]
    BetaSchedule(String),
    #[error("unsupported prediction type '{0}'")]
    PredictionType(String),
    #[error("unsupported timestep spacing '{0}'")]
    TimestepSpacing(String),
    #[error("{kind:?} sampler cannot handle {prediction:?} predictions")]
    Incompatible {
        kind: SchedulerKind,
        prediction: PredictionType,
    },
    #[error("scheduler needs at least one training timestep")]
    NoTrainTimesteps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    Ddim,
    EulerAncestral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetaSchedule {
    Linear,
    ScaledLinear,
    SquaredcosCapV2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionType {
    Epsilon,
    VPrediction,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestepSpacing {
    Leading,
    Linspace,
    Trailing,
}

/// Raw contents of `scheduler_config.json`; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(rename = "_class_name", default)]
    pub class_name: Option<String>,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: String,
    #[serde(default = "default_train_timesteps")]
    pub num_train_timesteps: usize,
    #[serde(default = "default_prediction_type")]
    pub prediction_type: String,
    #[serde(default = "default_steps_offset")]
    pub steps_offset: usize,
    #[serde(default = "default_timestep_spacing")]
    pub timestep_spacing: String,
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

fn default_train_timesteps() -> usize {
    1000
}

fn default_prediction_type() -> String {
    "epsilon".to_string()
}

fn default_steps_offset() -> usize {
    1
}

fn default_timestep_spacing() -> String {
    "leading".to_string()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            class_name: None,
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
            beta_schedule: default_beta_schedule(),
            num_train_timesteps: default_train_timesteps(),
            prediction_type: default_prediction_type(),
            steps_offset: default_steps_offset(),
            timestep_spacing: default_timestep_spacing(),
        }
    }
}

impl SchedulerSettings {
    /// Read `scheduler_config.json`; a missing file yields the SD defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("{} not found, using default scheduler settings", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A validated sampler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub kind: SchedulerKind,
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: BetaSchedule,
    pub train_timesteps: usize,
    pub prediction_type: PredictionType,
    pub steps_offset: usize,
    pub timestep_spacing: TimestepSpacing,
}

impl SchedulerSpec {
    /// The sampler a checkpoint ships with. Samplers without a backend
    /// counterpart (PNDM, LMS, DDPM...) map onto DDIM with the same betas.
    pub fn from_settings(settings: &SchedulerSettings) -> Result<Self, SchedulerError> {
        let kind = match settings.class_name.as_deref() {
            Some("EulerAncestralDiscreteScheduler") => SchedulerKind::EulerAncestral,
            Some("DDIMScheduler") | None => SchedulerKind::Ddim,
            Some(other) => {
                tracing::debug!("No native {} sampler, using DDIM", other);
                SchedulerKind::Ddim
            }
        };

        if settings.num_train_timesteps == 0 {
            return Err(SchedulerError::NoTrainTimesteps);
        }

        Ok(Self {
            kind,
            beta_start: settings.beta_start,
            beta_end: settings.beta_end,
            beta_schedule: parse_beta_schedule(&settings.beta_schedule)?,
            train_timesteps: settings.num_train_timesteps,
            prediction_type: parse_prediction_type(&settings.prediction_type)?,
            steps_offset: settings.steps_offset,
            timestep_spacing: parse_timestep_spacing(&settings.timestep_spacing)?,
        })
    }

    /// Few-step sampler derived from this one: Euler ancestral with trailing
    /// timesteps, so a single step starts from pure noise.
    pub fn fast_from(existing: &SchedulerSpec) -> Result<Self, SchedulerError> {
        if existing.prediction_type == PredictionType::Sample {
            return Err(SchedulerError::Incompatible {
                kind: SchedulerKind::EulerAncestral,
                prediction: existing.prediction_type,
            });
        }

        Ok(Self {
            kind: SchedulerKind::EulerAncestral,
            timestep_spacing: TimestepSpacing::Trailing,
            steps_offset: 0,
            ..*existing
        })
    }
}

fn parse_beta_schedule(value: &str) -> Result<BetaSchedule, SchedulerError> {
    match value {
        "linear" => Ok(BetaSchedule::Linear),
        "scaled_linear" => Ok(BetaSchedule::ScaledLinear),
        "squaredcos_cap_v2" => Ok(BetaSchedule::SquaredcosCapV2),
        other => Err(SchedulerError::BetaSchedule(other.to_string())),
    }
}

fn parse_prediction_type(value: &str) -> Result<PredictionType, SchedulerError> {
    match value {
        "epsilon" => Ok(PredictionType::Epsilon),
        "v_prediction" => Ok(PredictionType::VPrediction),
        "sample" => Ok(PredictionType::Sample),
        other => Err(SchedulerError::PredictionType(other.to_string())),
    }
}

fn parse_timestep_spacing(value: &str) -> Result<TimestepSpacing, SchedulerError> {
    match value {
        "leading" => Ok(TimestepSpacing::Leading),
        "linspace" => Ok(TimestepSpacing::Linspace),
        "trailing" => Ok(TimestepSpacing::Trailing),
        other => Err(SchedulerError::TimestepSpacing(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SD21_BASE: &str = r#"{
        "_class_name": "PNDMScheduler",
        "_diffusers_version": "0.8.0",
        "beta_end": 0.012,
        "beta_schedule": "scaled_linear",
        "beta_start": 0.00085,
        "clip_sample": false,
        "num_train_timesteps": 1000,
        "prediction_type": "epsilon",
        "set_alpha_to_one": false,
        "skip_prk_steps": true,
        "steps_offset": 1,
        "trained_betas": null
    }"#;

    #[test]
    fn diffusers_config_maps_to_ddim() {
        let settings: SchedulerSettings = serde_json::from_str(SD21_BASE).unwrap();
        let spec = SchedulerSpec::from_settings(&settings).unwrap();
        assert_eq!(spec.kind, SchedulerKind::Ddim);
        assert_eq!(spec.beta_schedule, BetaSchedule::ScaledLinear);
        assert_eq!(spec.prediction_type, PredictionType::Epsilon);
        assert_eq!(spec.timestep_spacing, TimestepSpacing::Leading);
        assert_eq!(spec.train_timesteps, 1000);
    }

    #[test]
    fn fast_sampler_keeps_the_noise_schedule() {
        let settings = SchedulerSettings {
            prediction_type: "v_prediction".into(),
            beta_schedule: "linear".into(),
            beta_end: 0.02,
            ..Default::default()
        };
        let existing = SchedulerSpec::from_settings(&settings).unwrap();
        let fast = SchedulerSpec::fast_from(&existing).unwrap();

        assert_eq!(fast.kind, SchedulerKind::EulerAncestral);
        assert_eq!(fast.timestep_spacing, TimestepSpacing::Trailing);
        assert_eq!(fast.beta_schedule, BetaSchedule::Linear);
        assert_eq!(fast.beta_end, 0.02);
        assert_eq!(fast.prediction_type, PredictionType::VPrediction);
    }

    #[test]
    fn sample_prediction_has_no_fast_sampler() {
        let settings = SchedulerSettings {
            prediction_type: "sample".into(),
            ..Default::default()
        };
        let existing = SchedulerSpec::from_settings(&settings).unwrap();
        assert_eq!(
            SchedulerSpec::fast_from(&existing),
            Err(SchedulerError::Incompatible {
                kind: SchedulerKind::EulerAncestral,
                prediction: PredictionType::Sample,
            })
        );
    }

    #[test]
    fn unknown_values_are_reported() {
        let settings = SchedulerSettings {
            beta_schedule: "exponential".into(),
            ..Default::default()
        };
        assert_eq!(
            SchedulerSpec::from_settings(&settings),
            Err(SchedulerError::BetaSchedule("exponential".into()))
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings =
            SchedulerSettings::from_file(Path::new("/nonexistent/scheduler_config.json")).unwrap();
        assert_eq!(settings, SchedulerSettings::default());
    }
}
