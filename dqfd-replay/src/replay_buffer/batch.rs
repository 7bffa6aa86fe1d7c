//! Batches of transitions handed to the learner.
use anyhow::Result;
use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

/// Which buffer a sampled row came from.
///
/// A supervised loss on demonstrations applies only to [`Source::Expert`] rows.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum Source {
    /// Self-generated interaction data.
    Online,

    /// Pre-collected demonstration data.
    Expert,
}

/// A batch of sampled transitions.
///
/// Frame stacks have shape `[batch, stack_depth, frame_shape..]`. Rows whose
/// next state does not exist (terminal transitions) hold zeros in `next_obs`;
/// use [`TransitionBatch::next_obs_at`] to get `None` for them instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBatch {
    /// Stacked frames of the sampled states.
    pub obs: ArrayD<u8>,

    /// Actions taken.
    pub act: Vec<i64>,

    /// One-step rewards.
    pub reward: Vec<f32>,

    /// Whether the transition ended its episode.
    pub is_terminated: Vec<i8>,

    /// Stacked frames of the next states.
    pub next_obs: ArrayD<u8>,

    /// Discounted n-step returns, truncated at episode ends.
    pub n_step_return: Vec<f32>,

    /// Number of rewards in each n-step return.
    pub n_step_len: Vec<usize>,

    /// Whether the n-step lookahead reached an episode end.
    pub n_step_terminated: Vec<i8>,

    /// Stacked frames of the n-step bootstrap states.
    pub n_step_obs: ArrayD<u8>,

    /// Raw priorities of the sampled slots.
    pub priority: Vec<f32>,

    /// Importance sampling weights.
    pub weight: Vec<f32>,

    /// Slots of the sampled transitions, used to update priorities.
    pub ix_sample: Vec<usize>,

    /// Buffer each row came from.
    pub source: Vec<Source>,
}

impl TransitionBatch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.act.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.act.is_empty()
    }

    /// Next state of row `i`, `None` if the transition is terminal.
    pub fn next_obs_at(&self, i: usize) -> Option<ArrayViewD<'_, u8>> {
        if self.is_terminated[i] != 0 {
            None
        } else {
            Some(self.next_obs.index_axis(Axis(0), i))
        }
    }

    /// n-step bootstrap state of row `i`, `None` if the return is terminal.
    pub fn n_step_obs_at(&self, i: usize) -> Option<ArrayViewD<'_, u8>> {
        if self.n_step_terminated[i] != 0 {
            None
        } else {
            Some(self.n_step_obs.index_axis(Axis(0), i))
        }
    }

    /// Number of rows from `source`.
    pub fn count(&self, source: Source) -> usize {
        self.source.iter().filter(|&&s| s == source).count()
    }

    /// Appends the rows of `other` after the rows of `self`.
    pub fn concat(self, other: Self) -> Result<Self> {
        fn cat<T: Clone>(mut a: Vec<T>, b: Vec<T>) -> Vec<T> {
            a.extend(b);
            a
        }

        Ok(Self {
            obs: concatenate(Axis(0), &[self.obs.view(), other.obs.view()])?,
            next_obs: concatenate(Axis(0), &[self.next_obs.view(), other.next_obs.view()])?,
            n_step_obs: concatenate(
                Axis(0),
                &[self.n_step_obs.view(), other.n_step_obs.view()],
            )?,
            act: cat(self.act, other.act),
            reward: cat(self.reward, other.reward),
            is_terminated: cat(self.is_terminated, other.is_terminated),
            n_step_return: cat(self.n_step_return, other.n_step_return),
            n_step_len: cat(self.n_step_len, other.n_step_len),
            n_step_terminated: cat(self.n_step_terminated, other.n_step_terminated),
            priority: cat(self.priority, other.priority),
            weight: cat(self.weight, other.weight),
            ix_sample: cat(self.ix_sample, other.ix_sample),
            source: cat(self.source, other.source),
        })
    }
}
