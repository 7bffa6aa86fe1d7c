#![warn(missing_docs)]
//! Prioritized experience replay for deep Q-learning from demonstrations.
//!
//! An online [`ReplayBuffer`] filled by the agent and an expert
//! [`ReplayBuffer`] bulk-loaded from demonstrations are sampled together by
//! [`DualBufferSampler`]. Both share one contract: frame-stacked states
//! rebuilt from a single-frame ring, n-step returns truncated at episode ends,
//! sum-tree prioritized sampling and annealed importance sampling weights.
pub mod error;
pub mod replay_buffer;

mod base;
pub use base::{ExperienceBufferBase, ReplayBufferBase};

mod schedule;
pub use schedule::{PiecewiseSchedule, ScheduleSegment};

mod dual_sampler;
pub use dual_sampler::{DualBufferSampler, ExpertPriorities};

pub use error::ReplayError;
pub use replay_buffer::{
    Demonstrations, Experience, PerConfig, ReplayBuffer, ReplayBufferConfig, Source,
    TransitionBatch, WeightNormalizer,
};
