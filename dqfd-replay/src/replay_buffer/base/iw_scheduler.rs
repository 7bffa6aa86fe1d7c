//! Scheduling the exponent of importance weight for PER.
use crate::PiecewiseSchedule;
use serde::{Deserialize, Serialize};

/// Scheduler of the exponent of importance weight for PER.
///
/// Owns the step counter of one buffer; the value itself comes from a
/// [`PiecewiseSchedule`] evaluated at that counter.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    /// Table of $\beta$ over optimization steps.
    pub schedule: PiecewiseSchedule,

    /// Current optimization steps.
    pub n_opts: usize,
}

impl IwScheduler {
    /// Creates a scheduler starting at step zero.
    pub fn new(schedule: PiecewiseSchedule) -> Self {
        Self {
            schedule,
            n_opts: 0,
        }
    }

    /// Gets the exponent of importance sampling weight.
    pub fn beta(&self) -> f32 {
        self.schedule.value(self.n_opts)
    }

    /// Add optimization steps for scheduling beta through training.
    pub fn add_n_opts(&mut self) {
        self.n_opts = self.n_opts.saturating_add(1);
    }
}
