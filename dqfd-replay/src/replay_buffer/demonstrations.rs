//! Pre-collected demonstration trajectories for bulk loading.
use crate::error::ReplayError;
use anyhow::Result;
use ndarray::ArrayD;

/// Parallel arrays of a demonstration dataset.
///
/// Row `i` holds the frame observed at step `i`, the action taken, the
/// processed reward received and whether the step ended its episode.
/// `frames` has shape `[rows, frame_shape..]`.
#[derive(Debug, Clone)]
pub struct Demonstrations {
    /// Observed frames.
    pub frames: ArrayD<u8>,

    /// Actions taken.
    pub actions: Vec<i64>,

    /// Processed rewards.
    pub rewards: Vec<f32>,

    /// Initial priorities, stored as given.
    pub priorities: Vec<f32>,

    /// Episode end flags.
    pub episode_endings: Vec<bool>,
}

impl Demonstrations {
    /// Bundles demonstration arrays, giving every row the same priority.
    pub fn with_uniform_priority(
        frames: ArrayD<u8>,
        actions: Vec<i64>,
        rewards: Vec<f32>,
        episode_endings: Vec<bool>,
        priority: f32,
    ) -> Self {
        let priorities = vec![priority; actions.len()];
        Self {
            frames,
            actions,
            rewards,
            priorities,
            episode_endings,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Checks that the arrays are aligned, match `frame_shape` and fit into
    /// `capacity` slots.
    pub fn validate(&self, frame_shape: &[usize], capacity: usize) -> Result<()> {
        let rows = self.len();
        let shape = self.frames.shape();
        if shape.is_empty() || &shape[1..] != frame_shape {
            return Err(ReplayError::Configuration(format!(
                "demonstration frames have shape {:?}, expected [_, {:?}]",
                shape, frame_shape
            ))
            .into());
        }
        let lens = [
            shape[0],
            self.rewards.len(),
            self.priorities.len(),
            self.episode_endings.len(),
        ];
        if lens.iter().any(|&n| n != rows) {
            return Err(ReplayError::Configuration(format!(
                "demonstration arrays differ in length: frames {}, actions {}, rewards {}, priorities {}, episode_endings {}",
                lens[0], rows, lens[1], lens[2], lens[3]
            ))
            .into());
        }
        if rows > capacity {
            return Err(ReplayError::Configuration(format!(
                "{} demonstration rows exceed capacity {}",
                rows, capacity
            ))
            .into());
        }
        Ok(())
    }
}
