//! Replay buffer interface.
//!
//! Storing experiences and generating batches are separate concerns, so they
//! are separate traits: the environment side only needs
//! [`ExperienceBufferBase`], the learner only needs [`ReplayBufferBase`].
use anyhow::Result;

/// Interface for buffers that store experiences from environments.
pub trait ExperienceBufferBase {
    /// Items pushed into the buffer.
    type Item;

    /// Pushes an experience, overwriting the oldest one when full.
    ///
    /// # Arguments
    ///
    /// * `tr` - The experience to store
    ///
    /// # Returns
    ///
    /// An error if the experience does not fit the buffer, e.g. a frame of
    /// the wrong shape
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Number of experiences in the buffer.
    fn len(&self) -> usize;

    /// Whether the buffer holds no experience.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interface for replay buffers that generate batches for training.
pub trait ReplayBufferBase: Sized {
    /// Configuration parameters for the replay buffer.
    ///
    /// Cloneable so that several buffers can be built from one configuration.
    type Config: Clone;

    /// Batch generated for training.
    type Batch;

    /// Builds a replay buffer from the given configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration parameters
    ///
    /// # Returns
    ///
    /// A new replay buffer, or an error if the configuration is invalid
    fn build(config: &Self::Config) -> Result<Self>;

    /// Samples a batch of `size` rows.
    ///
    /// # Arguments
    ///
    /// * `size` - The number of rows in the batch
    ///
    /// # Returns
    ///
    /// A batch, or an error if the buffer cannot provide `size` rows
    fn sample(&mut self, size: usize) -> Result<Self::Batch>;

    /// Updates the priorities of sampled slots from their TD-errors.
    ///
    /// # Arguments
    ///
    /// * `ixs` - Slots of the sampled rows
    /// * `td_errs` - TD-errors of the rows, aligned with `ixs`
    ///
    /// # Returns
    ///
    /// An error if the slices differ in length or a slot is out of range
    fn update_priorities(&mut self, ixs: &[usize], td_errs: &[f32]) -> Result<()>;
}
