//! Mixed sampling from an online buffer and an expert buffer.
use crate::{
    error::ReplayError,
    replay_buffer::{Experience, ReplayBuffer, Source, TransitionBatch},
    ExperienceBufferBase, ReplayBufferBase,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Whether TD-error updates reach the expert buffer.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum ExpertPriorities {
    /// Expert priorities are updated from TD-errors like online ones.
    TdError,

    /// Expert priorities keep the values they were loaded with.
    Static,
}

impl Default for ExpertPriorities {
    fn default() -> Self {
        Self::TdError
    }
}

/// Samples batches mixing an online buffer with an expert buffer.
///
/// The online buffer grows during training; the expert buffer is loaded once
/// and never appended to. Each buffer keeps its own capacity, priorities and
/// importance sampling schedule, and rows are tagged with their [`Source`].
pub struct DualBufferSampler {
    online: ReplayBuffer,
    expert: ReplayBuffer,
    expert_priorities: ExpertPriorities,
}

impl DualBufferSampler {
    /// Pairs two buffers. Their frame shapes and stack depths must agree.
    pub fn new(online: ReplayBuffer, expert: ReplayBuffer) -> Result<Self> {
        if online.frame_shape() != expert.frame_shape()
            || online.num_stacked_frames() != expert.num_stacked_frames()
        {
            return Err(ReplayError::Configuration(format!(
                "online stacks {} x {:?} but expert stacks {} x {:?}",
                online.num_stacked_frames(),
                online.frame_shape(),
                expert.num_stacked_frames(),
                expert.frame_shape()
            ))
            .into());
        }
        Ok(Self {
            online,
            expert,
            expert_priorities: ExpertPriorities::default(),
        })
    }

    /// Sets whether TD-error updates reach the expert buffer.
    pub fn expert_priorities(mut self, expert_priorities: ExpertPriorities) -> Self {
        self.expert_priorities = expert_priorities;
        self
    }

    /// The online buffer.
    pub fn online(&self) -> &ReplayBuffer {
        &self.online
    }

    /// The online buffer, mutably.
    pub fn online_mut(&mut self) -> &mut ReplayBuffer {
        &mut self.online
    }

    /// The expert buffer.
    pub fn expert(&self) -> &ReplayBuffer {
        &self.expert
    }

    /// The expert buffer, mutably.
    pub fn expert_mut(&mut self) -> &mut ReplayBuffer {
        &mut self.expert
    }

    /// Pushes an experience into the online buffer.
    pub fn push(&mut self, tr: Experience) -> Result<()> {
        self.online.push(tr)
    }

    /// Samples `round(expert_fraction * batch_size)` expert rows followed by
    /// online rows filling the rest of the batch.
    ///
    /// Each sub-buffer weights its rows with its own schedule. A sub-buffer
    /// whose share is zero is not drawn from, and its step counter does not
    /// move. If either share cannot be provided, neither buffer changes.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Total number of rows.
    /// * `expert_fraction` - Share of expert rows, in `[0, 1]`.
    ///
    /// # Returns
    ///
    /// A batch whose rows are tagged with their [`Source`], expert rows
    /// first.
    pub fn sample_mixed(
        &mut self,
        batch_size: usize,
        expert_fraction: f32,
    ) -> Result<TransitionBatch> {
        if !(0.0..=1.0).contains(&expert_fraction) {
            return Err(ReplayError::Configuration(format!(
                "expert_fraction = {} must be in [0, 1]",
                expert_fraction
            ))
            .into());
        }
        let n_expert = ((expert_fraction * batch_size as f32).round() as usize).min(batch_size);
        let n_online = batch_size - n_expert;

        let checkpoint = self.expert.checkpoint();
        let mut expert = self.expert.sample(n_expert)?;
        let mut online = match self.online.sample(n_online) {
            Ok(batch) => batch,
            Err(e) => {
                self.expert.rewind(checkpoint);
                return Err(e);
            }
        };
        expert.source = vec![Source::Expert; n_expert];
        online.source = vec![Source::Online; n_online];
        expert.concat(online)
    }

    /// Routes TD-errors of a mixed batch back to the buffers the rows came
    /// from. Expert rows are skipped under [`ExpertPriorities::Static`].
    pub fn update_priorities(&mut self, batch: &TransitionBatch, td_errs: &[f32]) -> Result<()> {
        if batch.len() != td_errs.len() {
            return Err(ReplayError::LengthMismatch {
                slots: batch.len(),
                td_errors: td_errs.len(),
            }
            .into());
        }

        let mut online: (Vec<usize>, Vec<f32>) = (vec![], vec![]);
        let mut expert: (Vec<usize>, Vec<f32>) = (vec![], vec![]);
        for ((&ix, &source), &td_err) in batch
            .ix_sample
            .iter()
            .zip(batch.source.iter())
            .zip(td_errs.iter())
        {
            let (ixs, errs) = match source {
                Source::Online => &mut online,
                Source::Expert => &mut expert,
            };
            ixs.push(ix);
            errs.push(td_err);
        }

        self.online.update_priorities(&online.0, &online.1)?;
        if self.expert_priorities == ExpertPriorities::TdError {
            self.expert.update_priorities(&expert.0, &expert.1)?;
        }
        Ok(())
    }
}
