//! Translation of `SchedulerSpec` into candle's sampler configurations.

use anyhow::Result;
use candle_transformers::models::stable_diffusion::ddim::DDIMSchedulerConfig;
use candle_transformers::models::stable_diffusion::euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig;
use candle_transformers::models::stable_diffusion::schedulers::{
    self as sd, Scheduler, SchedulerConfig,
};
use onestep_runtime_api::{BetaSchedule, PredictionType, SchedulerKind, SchedulerSpec, TimestepSpacing};

pub(crate) fn scheduler_config(spec: &SchedulerSpec) -> Box<dyn SchedulerConfig> {
    let beta_schedule = beta_schedule(spec.beta_schedule);
    let prediction_type = prediction_type(spec.prediction_type);
    let timestep_spacing = timestep_spacing(spec.timestep_spacing);

    match spec.kind {
        SchedulerKind::Ddim => Box::new(DDIMSchedulerConfig {
            beta_start: spec.beta_start,
            beta_end: spec.beta_end,
            beta_schedule,
            steps_offset: spec.steps_offset,
            prediction_type,
            train_timesteps: spec.train_timesteps,
            timestep_spacing,
            ..Default::default()
        }),
        SchedulerKind::EulerAncestral => Box::new(EulerAncestralDiscreteSchedulerConfig {
            beta_start: spec.beta_start,
            beta_end: spec.beta_end,
            beta_schedule,
            steps_offset: spec.steps_offset,
            prediction_type,
            train_timesteps: spec.train_timesteps,
            timestep_spacing,
            ..Default::default()
        }),
    }
}

/// A fresh sampler for one generation run.
pub(crate) fn build_scheduler(spec: &SchedulerSpec, steps: usize) -> Result<Box<dyn Scheduler>> {
    Ok(scheduler_config(spec).build(steps)?)
}

fn beta_schedule(value: BetaSchedule) -> sd::BetaSchedule {
    match value {
        BetaSchedule::Linear => sd::BetaSchedule::Linear,
        BetaSchedule::ScaledLinear => sd::BetaSchedule::ScaledLinear,
        BetaSchedule::SquaredcosCapV2 => sd::BetaSchedule::SquaredcosCapV2,
    }
}

fn prediction_type(value: PredictionType) -> sd::PredictionType {
    match value {
        PredictionType::Epsilon => sd::PredictionType::Epsilon,
        PredictionType::VPrediction => sd::PredictionType::VPrediction,
        PredictionType::Sample => sd::PredictionType::Sample,
    }
}

fn timestep_spacing(value: TimestepSpacing) -> sd::TimestepSpacing {
    match value {
        TimestepSpacing::Leading => sd::TimestepSpacing::Leading,
        TimestepSpacing::Linspace => sd::TimestepSpacing::Linspace,
        TimestepSpacing::Trailing => sd::TimestepSpacing::Trailing,
    }
}
