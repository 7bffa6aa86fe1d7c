//! Prioritized replay buffer over a ring of single frames.
//!
//! Frame stacks, next states and n-step bootstrap states are rebuilt from the
//! ring at sampling time, so every frame is stored exactly once.
mod iw_scheduler;
mod sum_tree;
use super::{
    batch::{Source, TransitionBatch},
    config::{PerConfig, ReplayBufferConfig},
    demonstrations::Demonstrations,
    frame_arena::FrameArena,
    snapshot::{Snapshot, SNAPSHOT_VERSION},
    transition_index::TransitionIndex,
};
use crate::{error::ReplayError, ExperienceBufferBase, ReplayBufferBase};
use anyhow::{anyhow, Result};
pub use iw_scheduler::IwScheduler;
use log::{debug, info, warn};
use ndarray::{ArrayD, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{borrow::Cow, path::Path};
pub use sum_tree::{SumTree, WeightNormalizer};

/// One environment step as stored in the buffer.
///
/// `frame` is the observation the action was taken in; `is_episode_end` marks
/// the step that ended the episode.
#[derive(Debug, Clone)]
pub struct Experience {
    /// Observed frame.
    pub frame: ArrayD<u8>,

    /// Action taken.
    pub act: i64,

    /// Processed reward.
    pub reward: f32,

    /// Whether this step ended the episode.
    pub is_episode_end: bool,
}

impl Experience {
    /// Creates an experience.
    pub fn new(frame: ArrayD<u8>, act: i64, reward: f32, is_episode_end: bool) -> Self {
        Self {
            frame,
            act,
            reward,
            is_episode_end,
        }
    }
}

/// State management for Prioritized Experience Replay (PER).
struct PerState {
    /// A sum tree data structure for efficient priority sampling.
    sum_tree: SumTree,

    /// Scheduler for importance sampling weights.
    iw_scheduler: IwScheduler,

    priority_exponent: f32,
    epsilon: f32,
    normalize: WeightNormalizer,

    /// Largest priority stored so far, given to newly pushed transitions.
    max_priority: f32,
}

impl PerState {
    fn new(capacity: usize, per_config: &PerConfig) -> Self {
        Self {
            sum_tree: SumTree::new(capacity, per_config.epsilon),
            iw_scheduler: IwScheduler::new(per_config.importance_sampling_schedule.clone()),
            priority_exponent: per_config.priority_exponent,
            epsilon: per_config.epsilon,
            normalize: per_config.normalize,
            max_priority: per_config.epsilon.max(1.0),
        }
    }

    fn set(&mut self, ix: usize, p: f32) {
        let p = self.sum_tree.update(ix, p);
        if p > self.max_priority {
            self.max_priority = p;
        }
    }

    fn priority_from_td_err(&self, td_err: f32) -> f32 {
        (td_err.abs() + self.epsilon).powf(self.priority_exponent)
    }

    /// The weight is $w_i=\left(N^{-1}P(i)^{-1}\right)^{\beta}$, normalized
    /// according to `self.normalize`.
    fn weights(&self, priority: &[f32], n_stored: usize) -> Vec<f32> {
        let beta = self.iw_scheduler.beta() as f64;
        let total = self.sum_tree.total();
        let n = n_stored as f64;
        let w = |p: f64| (n * p / total).powf(-beta);

        let ws = priority.iter().map(|&p| w(p as f64)).collect::<Vec<_>>();
        let w_max = match self.normalize {
            WeightNormalizer::Batch => ws.iter().cloned().fold(0f64, f64::max),
            WeightNormalizer::All => w(self.sum_tree.min() as f64),
        };
        ws.iter().map(|w| (w / w_max) as f32).collect()
    }
}

/// Sampling state of a [`ReplayBuffer`] that a failed draw rolls back to.
pub(crate) struct SamplingCheckpoint {
    rng: StdRng,
    n_opts: Option<usize>,
}

/// Replay buffer of frame-stacked transitions with optional prioritized
/// sampling and n-step returns.
///
/// Sampling only hands out slots whose frame stack and n-step lookahead stay
/// within one episode and within written memory; other slots are redrawn.
pub struct ReplayBuffer {
    capacity: usize,
    stack_depth: usize,
    n_step: usize,
    discount_factor: f32,
    batch_size: usize,
    max_draws_per_row: usize,
    source: Source,
    frames: FrameArena,
    index: TransitionIndex,
    rng: StdRng,
    per_state: Option<PerState>,
}

impl ReplayBuffer {
    fn empty(config: &ReplayBufferConfig) -> Self {
        let capacity = config.max_frame_num;
        Self {
            capacity,
            stack_depth: config.num_stacked_frames,
            n_step: config.n_step,
            discount_factor: config.discount_factor,
            batch_size: config.batch_size,
            max_draws_per_row: config.max_draws_per_row,
            source: Source::Online,
            frames: FrameArena::new(&config.frame_shape, capacity),
            index: TransitionIndex::new(capacity),
            rng: StdRng::seed_from_u64(config.seed),
            per_state: config
                .per_config
                .as_ref()
                .map(|per_config| PerState::new(capacity, per_config)),
        }
    }

    /// Builds an expert buffer from demonstration arrays.
    ///
    /// The given priorities are stored as they are (only clamped to the
    /// floor); rows of the returned buffer are tagged [`Source::Expert`].
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration of the buffer
    /// * `demonstrations` - Aligned frames, actions, rewards, priorities and
    ///   episode endings, at most `config.max_frame_num` rows
    ///
    /// # Returns
    ///
    /// The filled buffer, or [`ReplayError::Configuration`] if the arrays do
    /// not fit the configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use dqfd_replay::{
    ///     Demonstrations, ExperienceBufferBase, ReplayBuffer, ReplayBufferConfig, Source,
    /// };
    /// use ndarray::{Array, IxDyn};
    ///
    /// let rows = 64;
    /// let demos = Demonstrations::with_uniform_priority(
    ///     Array::zeros(IxDyn(&[rows, 8, 8])),
    ///     vec![0; rows],
    ///     vec![1.0; rows],
    ///     (0..rows).map(|t| t % 16 == 15).collect(),
    ///     1.0,
    /// );
    /// let config = ReplayBufferConfig::default()
    ///     .frame_shape(vec![8, 8])
    ///     .max_frame_num(rows)
    ///     .n_step(3);
    /// let expert = ReplayBuffer::from_demonstrations(&config, &demos).unwrap();
    /// assert_eq!(expert.len(), rows);
    /// assert_eq!(expert.source(), Source::Expert);
    /// ```
    pub fn from_demonstrations(
        config: &ReplayBufferConfig,
        demonstrations: &Demonstrations,
    ) -> Result<Self> {
        config.validate()?;
        demonstrations.validate(&config.frame_shape, config.max_frame_num)?;

        let mut buffer = Self::empty(config);
        buffer.source = Source::Expert;
        for (i, frame) in demonstrations.frames.outer_iter().enumerate() {
            let slot = buffer.frames.push(frame)?;
            buffer.index.record(
                slot,
                demonstrations.actions[i],
                demonstrations.rewards[i],
                demonstrations.episode_endings[i],
            );
            if let Some(per_state) = &mut buffer.per_state {
                per_state.sum_tree.update(slot, demonstrations.priorities[i]);
            }
        }
        if let Some(per_state) = &mut buffer.per_state {
            let floor = per_state.sum_tree.floor();
            per_state.max_priority = demonstrations
                .priorities
                .iter()
                .fold(floor, |m, &p| m.max(p));
        }

        info!(
            "Loaded {} demonstration transitions ({} episode ends)",
            demonstrations.len(),
            buffer.num_episode_ends()
        );
        Ok(buffer)
    }

    /// Restores a buffer saved with [`ReplayBuffer::persist`].
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration the snapshot was saved with
    /// * `path` - Snapshot file
    ///
    /// # Returns
    ///
    /// The restored buffer, with the same priorities and step counter as the
    /// saved one. [`ReplayError::Persistence`] if the snapshot is missing,
    /// corrupt or does not match `config`.
    pub fn restore(config: &ReplayBufferConfig, path: impl AsRef<Path>) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let snapshot = Snapshot::load(path)?;
        snapshot.check(config)?;

        let mut buffer = Self::empty(config);
        buffer.frames = FrameArena::from_raw(
            &snapshot.frame_shape,
            snapshot.capacity,
            snapshot.head,
            snapshot.len,
            snapshot.frames.into_owned(),
        );
        buffer.index = TransitionIndex::from_raw(
            snapshot.head,
            snapshot.len,
            snapshot.act.into_owned(),
            snapshot.reward.into_owned(),
            snapshot.is_episode_end.into_owned(),
        );
        if let Some(per_state) = &mut buffer.per_state {
            per_state.sum_tree = SumTree::from_leaves(&snapshot.priorities, per_state.epsilon);
            per_state.max_priority = snapshot.max_priority;
            per_state.iw_scheduler.n_opts = snapshot.n_opts;
        }

        info!("Restored {} transitions from {:?}", buffer.index.len(), path);
        Ok(buffer)
    }

    /// Saves frames, transitions, priorities and counters.
    ///
    /// # Arguments
    ///
    /// * `path` - Snapshot file, created or truncated
    ///
    /// # Returns
    ///
    /// [`ReplayError::Persistence`] if the file cannot be written
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let (act, reward, is_episode_end) = self.index.raw();
        let (priorities, max_priority, n_opts) = match &self.per_state {
            Some(per_state) => (
                per_state.sum_tree.leaves(),
                per_state.max_priority,
                per_state.iw_scheduler.n_opts,
            ),
            None => (vec![], 0.0, 0),
        };
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            frame_shape: self.frames.frame_shape().to_vec(),
            capacity: self.capacity,
            head: self.index.head(),
            len: self.index.len(),
            frames: Cow::Borrowed(self.frames.raw()),
            act: Cow::Borrowed(act),
            reward: Cow::Borrowed(reward),
            is_episode_end: Cow::Borrowed(is_episode_end),
            priorities: Cow::Owned(priorities),
            max_priority,
            n_opts,
        };
        snapshot.save(path)?;
        info!("Saved {} transitions to {:?}", self.index.len(), path);
        Ok(())
    }

    /// Reseeds the sampling random number generator.
    ///
    /// Two buffers with equal contents and seeds draw identical batches.
    ///
    /// # Arguments
    ///
    /// * `seed` - The new seed
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Samples a batch of the configured batch size.
    pub fn next_batch(&mut self) -> Result<TransitionBatch> {
        self.sample(self.batch_size)
    }

    /// Capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shape of a single frame.
    pub fn frame_shape(&self) -> &[usize] {
        self.frames.frame_shape()
    }

    /// Number of frames in a stacked state.
    pub fn num_stacked_frames(&self) -> usize {
        self.stack_depth
    }

    /// Provenance tag of sampled rows.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Whether `slot` can currently be sampled.
    ///
    /// # Arguments
    ///
    /// * `slot` - Slot index in `0..capacity`
    ///
    /// # Returns
    ///
    /// `true` if the frame stack ending at `slot` and its n-step lookahead
    /// stay within one episode and within written memory
    pub fn is_valid(&self, slot: usize) -> bool {
        self.index
            .valid_sample_window(slot, self.stack_depth, self.n_step)
    }

    /// Number of slots that can currently be sampled. Linear in capacity.
    pub fn num_valid_slots(&self) -> usize {
        (0..self.capacity).filter(|&slot| self.is_valid(slot)).count()
    }

    /// Number of stored transitions flagged as episode ends.
    pub fn num_episode_ends(&self) -> usize {
        self.index.num_episode_ends()
    }

    /// Sum of stored rewards.
    pub fn sum_rewards(&self) -> f32 {
        self.index.sum_rewards()
    }

    /// Priority of `slot`, `None` without PER.
    pub fn priority(&self, slot: usize) -> Option<f32> {
        self.per_state
            .as_ref()
            .map(|per_state| per_state.sum_tree.get(slot))
    }

    /// Sum of all priorities, `None` without PER.
    pub fn total_priority(&self) -> Option<f64> {
        self.per_state
            .as_ref()
            .map(|per_state| per_state.sum_tree.total())
    }

    /// Priority given to the next pushed transition, `None` without PER.
    pub fn max_priority(&self) -> Option<f32> {
        self.per_state.as_ref().map(|per_state| per_state.max_priority)
    }

    /// Current importance sampling exponent, `None` without PER.
    pub fn beta(&self) -> Option<f32> {
        self.per_state
            .as_ref()
            .map(|per_state| per_state.iw_scheduler.beta())
    }

    /// Number of batches sampled so far, `None` without PER.
    pub fn n_opts(&self) -> Option<usize> {
        self.per_state
            .as_ref()
            .map(|per_state| per_state.iw_scheduler.n_opts)
    }

    /// Captures the random number generator and the step counter.
    pub(crate) fn checkpoint(&self) -> SamplingCheckpoint {
        SamplingCheckpoint {
            rng: self.rng.clone(),
            n_opts: self.n_opts(),
        }
    }

    /// Returns the sampling state to `checkpoint`.
    pub(crate) fn rewind(&mut self, checkpoint: SamplingCheckpoint) {
        self.rng = checkpoint.rng;
        if let (Some(per_state), Some(n_opts)) = (&mut self.per_state, checkpoint.n_opts) {
            per_state.iw_scheduler.n_opts = n_opts;
        }
    }

    fn unavailable(&self, requested: usize, draws: usize) -> anyhow::Error {
        ReplayError::SamplingUnavailable {
            requested,
            available: self.num_valid_slots(),
            draws,
        }
        .into()
    }

    fn draw(&mut self) -> usize {
        match &self.per_state {
            Some(per_state) => {
                let total = per_state.sum_tree.total();
                per_state.sum_tree.sample(self.rng.gen::<f64>() * total)
            }
            None => {
                let len = self.index.len();
                let oldest = (self.index.head() + self.capacity - len) % self.capacity;
                (oldest + self.rng.gen_range(0..len)) % self.capacity
            }
        }
    }

    fn priorities_and_weights(&self, ixs: &[usize]) -> (Vec<f32>, Vec<f32>) {
        match &self.per_state {
            Some(per_state) => {
                let priority = ixs
                    .iter()
                    .map(|&ix| per_state.sum_tree.get(ix))
                    .collect::<Vec<_>>();
                let weight = per_state.weights(&priority, self.index.len());
                (priority, weight)
            }
            None => (vec![1.0; ixs.len()], vec![1.0; ixs.len()]),
        }
    }

    fn assemble(
        &self,
        ixs: Vec<usize>,
        priority: Vec<f32>,
        weight: Vec<f32>,
    ) -> Result<TransitionBatch> {
        let size = ixs.len();
        let depth = self.stack_depth;
        let stack_len = depth * self.frames.frame_len();
        let zeros = vec![0u8; stack_len];

        let mut obs = Vec::with_capacity(size * stack_len);
        let mut next_obs = Vec::with_capacity(size * stack_len);
        let mut n_step_obs = Vec::with_capacity(size * stack_len);
        let mut act = Vec::with_capacity(size);
        let mut reward = Vec::with_capacity(size);
        let mut is_terminated = Vec::with_capacity(size);
        let mut n_step_return = Vec::with_capacity(size);
        let mut n_step_len = Vec::with_capacity(size);
        let mut n_step_terminated = Vec::with_capacity(size);

        for &ix in ixs.iter() {
            let target = self
                .index
                .n_step_return(ix, self.n_step, self.discount_factor)
                .ok_or_else(|| anyhow!("slot {} has no n-step target", ix))?;
            let done = self.index.is_episode_end(ix);

            self.frames.extend_window(ix, depth, &mut obs);
            if done {
                next_obs.extend_from_slice(&zeros);
            } else {
                self.frames
                    .extend_window((ix + 1) % self.capacity, depth, &mut next_obs);
            }
            if target.terminated {
                n_step_obs.extend_from_slice(&zeros);
            } else {
                self.frames
                    .extend_window((ix + target.len) % self.capacity, depth, &mut n_step_obs);
            }

            act.push(self.index.act(ix));
            reward.push(self.index.reward(ix));
            is_terminated.push(done as i8);
            n_step_return.push(target.value);
            n_step_len.push(target.len);
            n_step_terminated.push(target.terminated as i8);
        }

        let mut shape = vec![size, depth];
        shape.extend_from_slice(self.frames.frame_shape());
        Ok(TransitionBatch {
            obs: ArrayD::from_shape_vec(IxDyn(&shape), obs)?,
            next_obs: ArrayD::from_shape_vec(IxDyn(&shape), next_obs)?,
            n_step_obs: ArrayD::from_shape_vec(IxDyn(&shape), n_step_obs)?,
            act,
            reward,
            is_terminated,
            n_step_return,
            n_step_len,
            n_step_terminated,
            priority,
            weight,
            ix_sample: ixs,
            source: vec![self.source; size],
        })
    }
}

impl ExperienceBufferBase for ReplayBuffer {
    type Item = Experience;

    fn len(&self) -> usize {
        self.index.len()
    }

    /// Writes the frame and transition at the head. Under PER the new slot
    /// gets the largest priority seen so far.
    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let slot = self.frames.push(tr.frame.view())?;
        self.index.record(slot, tr.act, tr.reward, tr.is_episode_end);
        if let Some(per_state) = &mut self.per_state {
            let p = per_state.max_priority;
            per_state.sum_tree.update(slot, p);
        }
        Ok(())
    }
}

impl ReplayBufferBase for ReplayBuffer {
    type Config = ReplayBufferConfig;
    type Batch = TransitionBatch;

    /// Builds an empty buffer, or restores one if `restore_path` is set.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration parameters
    ///
    /// # Returns
    ///
    /// [`ReplayError::Configuration`] for invalid parameters, or the errors of
    /// [`ReplayBuffer::restore`]
    fn build(config: &Self::Config) -> Result<Self> {
        if let Some(path) = &config.restore_path {
            return Self::restore(config, path);
        }
        config.validate()?;
        info!(
            "Replay buffer of {} frames {:?}, {} stacked, {}-step returns, PER: {}",
            config.max_frame_num,
            config.frame_shape,
            config.num_stacked_frames,
            config.n_step,
            config.per_config.is_some()
        );
        Ok(Self::empty(config))
    }

    /// Samples `size` distinct valid slots.
    ///
    /// Draws that hit an invalid or already chosen slot are repeated, up to
    /// `size * max_draws_per_row` draws in total. Under PER each successful
    /// call with `size > 0` advances the step counter of the importance
    /// sampling schedule. A failed call leaves the buffer unchanged.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of rows in the batch.
    ///
    /// # Returns
    ///
    /// A [`TransitionBatch`] of `size` rows, or
    /// [`ReplayError::SamplingUnavailable`] if that many valid slots could not
    /// be collected.
    fn sample(&mut self, size: usize) -> Result<Self::Batch> {
        if size == 0 {
            return self.assemble(vec![], vec![], vec![]);
        }
        if size > self.index.len() {
            return Err(self.unavailable(size, 0));
        }

        let checkpoint = self.checkpoint();
        let max_draws = size.saturating_mul(self.max_draws_per_row);
        let mut ixs: Vec<usize> = Vec::with_capacity(size);
        let mut draws = 0;
        while ixs.len() < size {
            if draws >= max_draws {
                warn!(
                    "Collected {} of {} rows after {} draws",
                    ixs.len(),
                    size,
                    draws
                );
                self.rewind(checkpoint);
                return Err(self.unavailable(size, draws));
            }
            draws += 1;
            let ix = self.draw();
            if !ixs.contains(&ix) && self.is_valid(ix) {
                ixs.push(ix);
            }
        }

        let (priority, weight) = self.priorities_and_weights(&ixs);
        if let Some(per_state) = &mut self.per_state {
            per_state.iw_scheduler.add_n_opts();
        }
        self.assemble(ixs, priority, weight)
    }

    /// Sets the priority of each slot to `(|td_err| + epsilon)^alpha`, never
    /// below `epsilon`. Does nothing without PER.
    ///
    /// # Arguments
    ///
    /// * `ixs` - Slots of sampled rows, usually [`TransitionBatch::ix_sample`]
    /// * `td_errs` - TD-errors aligned with `ixs`
    ///
    /// # Returns
    ///
    /// [`ReplayError::LengthMismatch`] or [`ReplayError::SlotOutOfRange`] for
    /// malformed input. Updates of slots not written yet are ignored.
    fn update_priorities(&mut self, ixs: &[usize], td_errs: &[f32]) -> Result<()> {
        if ixs.len() != td_errs.len() {
            return Err(ReplayError::LengthMismatch {
                slots: ixs.len(),
                td_errors: td_errs.len(),
            }
            .into());
        }
        if let Some(&slot) = ixs.iter().find(|&&ix| ix >= self.capacity) {
            return Err(ReplayError::SlotOutOfRange {
                slot,
                capacity: self.capacity,
            }
            .into());
        }

        if let Some(per_state) = &mut self.per_state {
            for (&ix, &td_err) in ixs.iter().zip(td_errs.iter()) {
                if self.frames.age(ix).is_none() {
                    debug!("Ignored priority update of unwritten slot {}", ix);
                    continue;
                }
                let p = per_state.priority_from_td_err(td_err);
                per_state.set(ix, p);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PiecewiseSchedule;
    use ndarray::{Array, Axis};

    fn config(capacity: usize) -> ReplayBufferConfig {
        ReplayBufferConfig::default()
            .frame_shape(vec![2, 2])
            .max_frame_num(capacity)
            .num_stacked_frames(4)
            .n_step(3)
            .batch_size(4)
            .seed(7)
    }

    fn frame(v: u8) -> ArrayD<u8> {
        ArrayD::from_elem(IxDyn(&[2, 2]), v)
    }

    fn push_episode(buffer: &mut ReplayBuffer, value: u8, rewards: &[f32]) {
        for (t, &r) in rewards.iter().enumerate() {
            let done = t + 1 == rewards.len();
            buffer
                .push(Experience::new(frame(value), t as i64, r, done))
                .unwrap();
        }
    }

    fn first_values(stack: ndarray::ArrayViewD<'_, u8>) -> Vec<u8> {
        stack.outer_iter().map(|f| f[[0, 0]]).collect()
    }

    fn kind(err: &anyhow::Error) -> Option<&ReplayError> {
        err.downcast_ref::<ReplayError>()
    }

    #[test]
    fn test_push_uses_max_priority() -> Result<()> {
        let mut buffer = ReplayBuffer::build(&config(16))?;
        buffer.push(Experience::new(frame(0), 0, 0.0, false))?;
        assert_eq!(buffer.priority(0), Some(1.0));

        buffer.update_priorities(&[0], &[100.0])?;
        let p = (100.0f32 + 0.001).powf(0.4);
        assert_eq!(buffer.priority(0), Some(p));
        assert_eq!(buffer.max_priority(), Some(p));

        buffer.push(Experience::new(frame(1), 0, 0.0, false))?;
        assert_eq!(buffer.priority(1), Some(p));

        let sum = (0..16).map(|ix| buffer.priority(ix).unwrap() as f64).sum::<f64>();
        assert!((buffer.total_priority().unwrap() - sum).abs() < 1e-9);
        // Unwritten slots keep zero priority.
        assert_eq!(buffer.priority(2), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_stacks_never_span_episodes() -> Result<()> {
        let mut buffer = ReplayBuffer::build(&config(64))?;
        for (id, len) in [7usize, 5, 9, 6].iter().enumerate() {
            push_episode(&mut buffer, id as u8 + 1, &vec![0.0; *len]);
        }
        assert_eq!(buffer.num_valid_slots(), 4 + 2 + 6 + 3);

        for _ in 0..200 {
            let batch = buffer.sample(4)?;
            for i in 0..batch.len() {
                let obs = batch.obs.index_axis(Axis(0), i);
                let id = obs[[0, 0, 0]];
                assert!(obs.iter().all(|&v| v == id));
                if let Some(next) = batch.next_obs_at(i) {
                    assert!(next.iter().all(|&v| v == id));
                }
                if let Some(boot) = batch.n_step_obs_at(i) {
                    assert!(boot.iter().all(|&v| v == id));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_n_step_return_truncated_at_episode_end() -> Result<()> {
        let gamma = 0.99f32;
        let config = config(16)
            .num_stacked_frames(1)
            .n_step(10)
            .discount_factor(gamma);
        let mut buffer = ReplayBuffer::build(&config)?;
        push_episode(&mut buffer, 1, &[1.0, 1.0, 1.0]);

        let batch = buffer.sample(3)?;
        let i = batch.ix_sample.iter().position(|&ix| ix == 0).unwrap();
        assert!((batch.n_step_return[i] - (1.0 + gamma + gamma * gamma)).abs() < 1e-6);
        assert_eq!(batch.n_step_len[i], 3);
        assert_eq!(batch.n_step_terminated[i], 1);
        assert!(batch.n_step_obs_at(i).is_none());
        assert_eq!(batch.is_terminated[i], 0);
        assert!(batch.next_obs_at(i).is_some());

        let last = batch.ix_sample.iter().position(|&ix| ix == 2).unwrap();
        assert_eq!(batch.is_terminated[last], 1);
        assert!(batch.next_obs_at(last).is_none());
        assert_eq!(batch.n_step_return[last], 1.0);
        Ok(())
    }

    #[test]
    fn test_windows_stay_contiguous_after_wrap() -> Result<()> {
        let mut buffer = ReplayBuffer::build(&config(32))?;
        for t in 0..100u8 {
            buffer.push(Experience::new(frame(t), t as i64, 1.0, false))?;
        }
        for _ in 0..200 {
            let batch = buffer.sample(4)?;
            for i in 0..batch.len() {
                let values = first_values(batch.obs.index_axis(Axis(0), i));
                assert!(values[0] >= 68, "stale frame {:?}", values);
                assert!(values.windows(2).all(|w| w[1] == w[0] + 1));
                let newest = values[3];
                assert_eq!(batch.act[i], newest as i64);
                let next = first_values(batch.next_obs_at(i).unwrap());
                assert_eq!(next[3], newest + 1);
                let boot = first_values(batch.n_step_obs_at(i).unwrap());
                assert_eq!(boot[3], newest + 3);
                assert!((batch.n_step_return[i] - (1.0 + 0.99 + 0.99 * 0.99)).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_weights_decrease_with_priority() -> Result<()> {
        let config = config(64).num_stacked_frames(1).n_step(1);
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..20u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        let ixs = (0..20).collect::<Vec<_>>();
        let td_errs = (0..20).map(|ix| ix as f32).collect::<Vec<_>>();
        buffer.update_priorities(&ixs, &td_errs)?;

        for _ in 0..50 {
            let batch = buffer.sample(8)?;
            assert!(batch.weight.iter().all(|&w| w > 0.0 && w <= 1.0));
            let w_max = batch.weight.iter().cloned().fold(0f32, f32::max);
            assert_eq!(w_max, 1.0);
            for i in 0..8 {
                for j in 0..8 {
                    if batch.priority[i] > batch.priority[j] {
                        assert!(batch.weight[i] < batch.weight[j]);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_weights_normalized_over_all_slots() -> Result<()> {
        let per_config = PerConfig::default().normalize(WeightNormalizer::All);
        let config = config(64)
            .num_stacked_frames(1)
            .n_step(1)
            .per_config(Some(per_config));
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..20u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        buffer.update_priorities(&[19], &[0.0])?;
        let batch = buffer.sample(4)?;
        // Slot 19 holds the smallest priority but cannot be sampled yet, so
        // no sampled weight reaches 1.
        assert!(batch.weight.iter().all(|&w| w < 1.0));
        Ok(())
    }

    #[test]
    fn test_priority_never_below_epsilon() -> Result<()> {
        let per_config = PerConfig::default().priority_exponent(2.0).epsilon(0.01);
        let config = config(16).per_config(Some(per_config));
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..4u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        buffer.update_priorities(&[0, 1, 2, 3], &[-1e9, 0.0, f32::NAN, -0.0])?;
        for ix in 0..4 {
            assert!(buffer.priority(ix).unwrap() >= 0.01);
        }
        assert_eq!(buffer.priority(1), Some(0.01));
        Ok(())
    }

    #[test]
    fn test_invalid_priority_updates() -> Result<()> {
        let mut buffer = ReplayBuffer::build(&config(16))?;
        buffer.push(Experience::new(frame(0), 0, 0.0, false))?;

        let err = buffer.update_priorities(&[0, 1], &[1.0]).unwrap_err();
        assert_eq!(
            kind(&err),
            Some(&ReplayError::LengthMismatch {
                slots: 2,
                td_errors: 1
            })
        );
        let err = buffer.update_priorities(&[16], &[1.0]).unwrap_err();
        assert_eq!(
            kind(&err),
            Some(&ReplayError::SlotOutOfRange {
                slot: 16,
                capacity: 16
            })
        );

        // Updates of unwritten slots are ignored.
        buffer.update_priorities(&[5], &[1.0])?;
        assert_eq!(buffer.priority(5), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_sampling_unavailable_at_cold_start() -> Result<()> {
        let mut buffer = ReplayBuffer::build(&config(64))?;
        for t in 0..2u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        let err = buffer.sample(3).unwrap_err();
        assert_eq!(
            kind(&err),
            Some(&ReplayError::SamplingUnavailable {
                requested: 3,
                available: 0,
                draws: 0
            })
        );

        // Five frames of one running episode: no slot has both three
        // predecessors and a three-step lookahead.
        for t in 2..5u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        assert_eq!(buffer.num_valid_slots(), 0);
        let err = buffer.sample(1).unwrap_err();
        assert_eq!(
            kind(&err),
            Some(&ReplayError::SamplingUnavailable {
                requested: 1,
                available: 0,
                draws: 100
            })
        );
        Ok(())
    }

    #[test]
    fn test_failed_sample_leaves_buffer_unchanged() -> Result<()> {
        let mut failed = ReplayBuffer::build(&config(64))?;
        let mut fresh = ReplayBuffer::build(&config(64))?;
        for buffer in vec![&mut failed, &mut fresh] {
            for t in 0..5u8 {
                buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
            }
        }
        assert!(failed.sample(1).is_err());
        assert!(failed.sample(2).is_err());
        let empty = failed.sample(0)?;
        assert!(empty.is_empty());
        assert_eq!(empty.obs.shape(), &[0, 4, 2, 2]);
        assert_eq!(failed.n_opts(), Some(0));

        for buffer in vec![&mut failed, &mut fresh] {
            push_episode(buffer, 9, &[1.0; 20]);
        }
        assert_eq!(failed.sample(4)?, fresh.sample(4)?);
        assert_eq!(failed.n_opts(), fresh.n_opts());
        Ok(())
    }

    #[test]
    fn test_beta_anneals_per_sample() -> Result<()> {
        let per_config = PerConfig::default()
            .importance_sampling_schedule(PiecewiseSchedule::linear(0.5, 1.0, 2));
        let config = config(64).per_config(Some(per_config));
        let mut buffer = ReplayBuffer::build(&config)?;
        push_episode(&mut buffer, 1, &[0.0; 20]);

        assert_eq!(buffer.beta(), Some(0.5));
        buffer.next_batch()?;
        assert_eq!(buffer.beta(), Some(0.75));
        buffer.next_batch()?;
        buffer.next_batch()?;
        assert_eq!(buffer.beta(), Some(1.0));
        assert_eq!(buffer.n_opts(), Some(3));
        Ok(())
    }

    #[test]
    fn test_uniform_sampling() -> Result<()> {
        let config = config(32).per_config(None);
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..50u8 {
            buffer.push(Experience::new(frame(t), 0, 0.5, t % 10 == 9))?;
        }
        let batch = buffer.sample(8)?;
        assert!(batch.weight.iter().all(|&w| w == 1.0));
        assert!(batch.ix_sample.iter().all(|&ix| buffer.is_valid(ix)));
        assert_eq!(buffer.priority(0), None);
        buffer.update_priorities(&batch.ix_sample, &[1.0; 8])?;
        assert_eq!(buffer.num_episode_ends(), 4);
        assert_eq!(buffer.sum_rewards(), 16.0);
        Ok(())
    }

    #[test]
    fn test_sampled_slots_are_distinct() -> Result<()> {
        let config = config(64).num_stacked_frames(1).n_step(1);
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..9u8 {
            buffer.push(Experience::new(frame(t), 0, 0.0, false))?;
        }
        let mut ixs = buffer.sample(8)?.ix_sample;
        ixs.sort_unstable();
        assert_eq!(ixs, (0..8).collect::<Vec<_>>());
        Ok(())
    }

    fn demonstrations(rows: usize) -> Demonstrations {
        let frames = Array::from_shape_fn(IxDyn(&[rows, 2, 2]), |ix| ix[0] as u8);
        let mut demos = Demonstrations::with_uniform_priority(
            frames,
            (0..rows as i64).collect(),
            vec![1.0; rows],
            (0..rows).map(|t| t % 8 == 7).collect(),
            1.0,
        );
        demos.priorities[5] = 3.0;
        demos
    }

    #[test]
    fn test_bulk_load_keeps_priorities() -> Result<()> {
        let per_config = PerConfig::default().epsilon(0.5);
        let config = config(64).per_config(Some(per_config));
        let mut buffer = ReplayBuffer::from_demonstrations(&config, &demonstrations(32))?;

        assert_eq!(buffer.len(), 32);
        assert_eq!(buffer.source(), Source::Expert);
        assert_eq!(buffer.priority(0), Some(1.0));
        assert_eq!(buffer.priority(5), Some(3.0));
        assert_eq!(buffer.max_priority(), Some(3.0));
        assert_eq!(buffer.num_episode_ends(), 4);

        let batch = buffer.sample(8)?;
        assert!(batch.source.iter().all(|&s| s == Source::Expert));
        for i in 0..batch.len() {
            let values = first_values(batch.obs.index_axis(Axis(0), i));
            assert_eq!(values[3] as usize, batch.ix_sample[i]);
            assert_eq!(batch.act[i] as usize, batch.ix_sample[i]);
        }
        Ok(())
    }

    #[test]
    fn test_bulk_load_rejects_mismatched_arrays() {
        let config = config(16);
        let is_config_error = |demos: &Demonstrations| {
            let err = ReplayBuffer::from_demonstrations(&config, demos)
                .err()
                .unwrap();
            matches!(kind(&err), Some(ReplayError::Configuration(_)))
        };

        let mut demos = demonstrations(8);
        demos.rewards.pop();
        assert!(is_config_error(&demos));

        let mut demos = demonstrations(8);
        demos.frames = ArrayD::zeros(IxDyn(&[8, 3, 3]));
        assert!(is_config_error(&demos));

        assert!(is_config_error(&demonstrations(17)));
    }
}
