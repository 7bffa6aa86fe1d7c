//! Piecewise-linear schedules of scalars over step counts.
//!
//! The same schedule backs the exponent of importance sampling weights, the
//! exploration rate of an epsilon-greedy policy and the learning rate: only
//! the table and the step counter differ.
use crate::error::ReplayError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A linear ramp from `start` to `end` lasting `duration` steps.
///
/// In YAML it can be written either as a map or as a `[start, end, duration]`
/// sequence.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ScheduleSegment {
    /// Value at the first step of the segment.
    pub start: f32,

    /// Value reached when the segment is exhausted.
    pub end: f32,

    /// Number of steps the segment is active.
    pub duration: usize,
}

impl ScheduleSegment {
    /// Creates a segment.
    pub fn new(start: f32, end: f32, duration: usize) -> Self {
        Self {
            start,
            end,
            duration,
        }
    }
}

/// Sequence of [`ScheduleSegment`]s applied one after another.
///
/// Segment `i` is active while the step count lies in its window and
/// interpolates linearly inside it. After the last segment the output holds
/// its `end` value forever. The schedule holds no counter; callers pass the
/// step explicitly.
///
/// ```
/// use dqfd_replay::{PiecewiseSchedule, ScheduleSegment};
///
/// let eps = PiecewiseSchedule::new(vec![
///     ScheduleSegment::new(0.25, 0.1, 250_000),
///     ScheduleSegment::new(0.1, 0.01, 5_000_000),
/// ])
/// .unwrap();
/// assert_eq!(eps.value(0), 0.25);
/// assert_eq!(eps.value(250_000), 0.1);
/// assert_eq!(eps.value(100_000_000), 0.01);
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(transparent)]
pub struct PiecewiseSchedule {
    segments: Vec<ScheduleSegment>,
}

impl PiecewiseSchedule {
    /// Creates a schedule, failing when `segments` is empty.
    pub fn new(segments: Vec<ScheduleSegment>) -> Result<Self> {
        let schedule = Self { segments };
        schedule.validate()?;
        Ok(schedule)
    }

    /// A single ramp, the common case for the importance sampling exponent.
    pub fn linear(start: f32, end: f32, duration: usize) -> Self {
        Self {
            segments: vec![ScheduleSegment::new(start, end, duration)],
        }
    }

    /// A schedule that always returns `value`.
    pub fn constant(value: f32) -> Self {
        Self::linear(value, value, 0)
    }

    /// Checks that the schedule has at least one segment of finite values.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(ReplayError::Configuration("schedule has no segments".into()).into());
        }
        if self
            .segments
            .iter()
            .any(|s| !s.start.is_finite() || !s.end.is_finite())
        {
            return Err(
                ReplayError::Configuration("schedule contains non-finite values".into()).into(),
            );
        }
        Ok(())
    }

    /// Segments of the schedule.
    pub fn segments(&self) -> &[ScheduleSegment] {
        &self.segments
    }

    /// Sum of all segment durations.
    pub fn total_duration(&self) -> usize {
        self.segments
            .iter()
            .fold(0usize, |acc, s| acc.saturating_add(s.duration))
    }

    /// Value of the schedule at `step`.
    pub fn value(&self, step: usize) -> f32 {
        let mut offset = 0usize;
        for segment in self.segments.iter() {
            let end = offset.saturating_add(segment.duration);
            if step < end {
                let t = (step - offset) as f32 / segment.duration as f32;
                return segment.start + (segment.end - segment.start) * t;
            }
            offset = end;
        }
        self.segments.last().map_or(0.0, |s| s.end)
    }
}
