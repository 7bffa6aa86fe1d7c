//! Configuration of [`ReplayBuffer`](super::ReplayBuffer).
use super::WeightNormalizer;
use crate::{error::ReplayError, PiecewiseSchedule};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Configuration for Prioritized Experience Replay (PER).
///
/// ```rust
/// use dqfd_replay::{PerConfig, PiecewiseSchedule, WeightNormalizer};
///
/// let config = PerConfig::default()
///     .priority_exponent(0.4)
///     .importance_sampling_schedule(PiecewiseSchedule::linear(0.6, 1.0, 1_500_000))
///     .epsilon(0.001)
///     .normalize(WeightNormalizer::Batch);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent applied to `|td_error| + epsilon` when priorities are updated.
    /// Kept fixed over training.
    pub priority_exponent: f32,

    /// Table of the importance sampling exponent $\beta$ over sampling steps.
    pub importance_sampling_schedule: PiecewiseSchedule,

    /// Added to `|td_error|` and used as the floor of every priority.
    pub epsilon: f32,

    /// How importance weights are normalized.
    pub normalize: WeightNormalizer,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            priority_exponent: 0.4,
            importance_sampling_schedule: PiecewiseSchedule::linear(0.6, 1.0, 1_500_000),
            epsilon: 0.001,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PerConfig {
    /// Sets the priority exponent.
    pub fn priority_exponent(mut self, priority_exponent: f32) -> Self {
        self.priority_exponent = priority_exponent;
        self
    }

    /// Sets the schedule of the importance sampling exponent.
    pub fn importance_sampling_schedule(mut self, schedule: PiecewiseSchedule) -> Self {
        self.importance_sampling_schedule = schedule;
        self
    }

    /// Sets the priority floor.
    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the method for normalizing importance weights.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Configuration of [`ReplayBuffer`](super::ReplayBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Shape of a single frame.
    pub frame_shape: Vec<usize>,

    /// Capacity of the frame ring, the transition ring and the sum tree.
    pub max_frame_num: usize,

    /// Number of frames in a stacked state.
    pub num_stacked_frames: usize,

    /// Default batch size.
    pub batch_size: usize,

    /// Horizon of the n-step return.
    pub n_step: usize,

    /// Discount factor of the n-step return.
    pub discount_factor: f32,

    /// Random seed for sampling.
    pub seed: u64,

    /// Draws allowed per requested row before sampling gives up.
    pub max_draws_per_row: usize,

    /// Snapshot restored at construction, if any.
    pub restore_path: Option<PathBuf>,

    /// Configuration of prioritized sampling. `None` samples uniformly.
    pub per_config: Option<PerConfig>,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            frame_shape: vec![84, 84],
            max_frame_num: 1 << 20,
            num_stacked_frames: 4,
            batch_size: 32,
            n_step: 10,
            discount_factor: 0.99,
            seed: 42,
            max_draws_per_row: 100,
            restore_path: None,
            per_config: Some(PerConfig::default()),
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the frame shape.
    pub fn frame_shape(mut self, frame_shape: Vec<usize>) -> Self {
        self.frame_shape = frame_shape;
        self
    }

    /// Sets the capacity.
    pub fn max_frame_num(mut self, max_frame_num: usize) -> Self {
        self.max_frame_num = max_frame_num;
        self
    }

    /// Sets the number of stacked frames.
    pub fn num_stacked_frames(mut self, num_stacked_frames: usize) -> Self {
        self.num_stacked_frames = num_stacked_frames;
        self
    }

    /// Sets the default batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the horizon of the n-step return.
    pub fn n_step(mut self, n_step: usize) -> Self {
        self.n_step = n_step;
        self
    }

    /// Sets the discount factor.
    pub fn discount_factor(mut self, discount_factor: f32) -> Self {
        self.discount_factor = discount_factor;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the number of draws allowed per requested row.
    pub fn max_draws_per_row(mut self, max_draws_per_row: usize) -> Self {
        self.max_draws_per_row = max_draws_per_row;
        self
    }

    /// Sets the snapshot to restore at construction.
    pub fn restore_path(mut self, restore_path: Option<PathBuf>) -> Self {
        self.restore_path = restore_path;
        self
    }

    /// Sets the configuration of prioritized sampling.
    pub fn per_config(mut self, per_config: Option<PerConfig>) -> Self {
        self.per_config = per_config;
        self
    }

    /// Checks the parameters, returning [`ReplayError::Configuration`] on the
    /// first violation.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(ReplayError::Configuration(msg).into()) };

        if self.max_frame_num == 0 {
            return fail("max_frame_num must be positive".into());
        }
        if self.frame_shape.is_empty() || self.frame_shape.contains(&0) {
            return fail(format!("invalid frame shape {:?}", self.frame_shape));
        }
        if self.num_stacked_frames == 0 || self.num_stacked_frames >= self.max_frame_num {
            return fail(format!(
                "num_stacked_frames = {} must be in 1..{}",
                self.num_stacked_frames, self.max_frame_num
            ));
        }
        if self.n_step == 0 || self.n_step >= self.max_frame_num {
            return fail(format!(
                "n_step = {} must be in 1..{}",
                self.n_step, self.max_frame_num
            ));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return fail(format!(
                "discount_factor = {} must be in [0, 1]",
                self.discount_factor
            ));
        }
        if self.max_draws_per_row == 0 {
            return fail("max_draws_per_row must be positive".into());
        }
        if let Some(per_config) = &self.per_config {
            if !(per_config.epsilon > 0.0) {
                return fail(format!("epsilon = {} must be positive", per_config.epsilon));
            }
            if !per_config.priority_exponent.is_finite() || per_config.priority_exponent < 0.0 {
                return fail(format!(
                    "priority_exponent = {} must be non-negative",
                    per_config.priority_exponent
                ));
            }
            per_config.importance_sampling_schedule.validate()?;
        }
        Ok(())
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
