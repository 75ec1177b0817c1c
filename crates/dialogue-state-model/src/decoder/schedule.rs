//! Teacher-forcing schedule.

use candle_core::Tensor;
use dialogue_state_core::{DecoderConfig, DstError};
use rand::Rng;

use super::DecodeMode;
use crate::error::ModelResult;

/// Per-batch draw of whether decoding feeds gold tokens.
///
/// Randomness comes from the caller's RNG so a seeded run is reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeacherForcingSchedule {
    ratio: f64,
}

impl TeacherForcingSchedule {
    pub fn new(ratio: f64) -> ModelResult<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(DstError::ConfigError(format!(
                "teacher_forcing_ratio must be within [0, 1], got {}",
                ratio
            ))
            .into());
        }
        Ok(Self { ratio })
    }

    pub fn from_config(config: &DecoderConfig) -> ModelResult<Self> {
        Self::new(config.teacher_forcing_ratio)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen::<f64>() < self.ratio
    }

    /// Draw a mode for one batch with `targets` [B, max_update, max_value].
    pub fn mode<'a, R: Rng + ?Sized>(&self, rng: &mut R, targets: &'a Tensor) -> DecodeMode<'a> {
        if self.sample(rng) {
            DecodeMode::TeacherForced(targets)
        } else {
            DecodeMode::Greedy
        }
    }
}
