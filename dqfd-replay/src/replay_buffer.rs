//! Prioritized experience replay over frame-stacked Atari-style observations.
//!
//! # Key Components
//!
//! - [`ReplayBuffer`]: the buffer, built empty, restored from a snapshot or
//!   bulk-loaded from [`Demonstrations`]
//! - [`FrameArena`]: ring of single frames from which stacks are rebuilt
//! - [`TransitionIndex`]: actions, rewards and episode ends; decides which
//!   slots may be sampled
//! - [`SumTree`]: priority index with logarithmic update and sampling
//! - [`IwScheduler`]: annealed exponent of importance sampling weights
//!
//! # Examples
//!
//! ```rust
//! use dqfd_replay::{
//!     Experience, ExperienceBufferBase, PerConfig, ReplayBuffer, ReplayBufferBase,
//!     ReplayBufferConfig,
//! };
//! use ndarray::{ArrayD, IxDyn};
//!
//! let config = ReplayBufferConfig::default()
//!     .frame_shape(vec![8, 8])
//!     .max_frame_num(1024)
//!     .n_step(3)
//!     .per_config(Some(PerConfig::default()));
//! let mut buffer = ReplayBuffer::build(&config).unwrap();
//!
//! for t in 0..64 {
//!     let frame = ArrayD::from_elem(IxDyn(&[8, 8]), t as u8);
//!     buffer
//!         .push(Experience::new(frame, 0, 1.0, t % 16 == 15))
//!         .unwrap();
//! }
//!
//! let batch = buffer.sample(8).unwrap();
//! assert_eq!(batch.obs.shape(), &[8, 4, 8, 8]);
//! buffer.update_priorities(&batch.ix_sample, &vec![0.5; 8]).unwrap();
//! ```
mod base;
mod batch;
mod config;
mod demonstrations;
mod frame_arena;
mod snapshot;
mod transition_index;
pub use base::{Experience, IwScheduler, ReplayBuffer, SumTree, WeightNormalizer};
pub use batch::{Source, TransitionBatch};
pub use config::{PerConfig, ReplayBufferConfig};
pub use demonstrations::Demonstrations;
pub use frame_arena::FrameArena;
pub use transition_index::{NStepTarget, TransitionIndex};
