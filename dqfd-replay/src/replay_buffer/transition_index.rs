//! Per-slot actions, rewards and episode boundaries.
//!
//! The index decides which slots may be handed out by the sampler: a slot is
//! legal only if its frame stack and its n-step lookahead stay inside one
//! episode and inside written memory.

/// Target of an n-step return starting at some slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NStepTarget {
    /// Discounted sum of the rewards from the slot onwards.
    pub value: f32,

    /// Number of rewards summed. When not terminated, the bootstrap state
    /// ends at `slot + len` and is discounted by $\gamma^{len}$.
    pub len: usize,

    /// Whether an episode end was reached within the horizon.
    pub terminated: bool,
}

/// Ring of `(action, reward, episode_end)` aligned with the frame arena.
#[derive(Debug, Clone)]
pub struct TransitionIndex {
    capacity: usize,
    head: usize,
    len: usize,
    act: Vec<i64>,
    reward: Vec<f32>,
    is_episode_end: Vec<i8>,
}

impl TransitionIndex {
    /// Allocates an empty ring.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            head: 0,
            len: 0,
            act: vec![0; capacity],
            reward: vec![0.; capacity],
            is_episode_end: vec![0; capacity],
        }
    }

    pub(crate) fn from_raw(
        head: usize,
        len: usize,
        act: Vec<i64>,
        reward: Vec<f32>,
        is_episode_end: Vec<i8>,
    ) -> Self {
        Self {
            capacity: act.len(),
            head,
            len,
            act,
            reward,
            is_episode_end,
        }
    }

    /// Records the transition written at `slot`, which must be the head.
    pub fn record(&mut self, slot: usize, act: i64, reward: f32, is_episode_end: bool) {
        debug_assert_eq!(slot, self.head);
        self.act[slot] = act;
        self.reward[slot] = reward;
        self.is_episode_end[slot] = is_episode_end as i8;
        self.head = (slot + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    /// Number of live transitions.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Slot of the next transition.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Action at `slot`.
    pub fn act(&self, slot: usize) -> i64 {
        self.act[slot]
    }

    /// Reward at `slot`.
    pub fn reward(&self, slot: usize) -> f32 {
        self.reward[slot]
    }

    /// Whether the transition at `slot` ended its episode.
    pub fn is_episode_end(&self, slot: usize) -> bool {
        self.is_episode_end[slot] != 0
    }

    pub(crate) fn raw(&self) -> (&[i64], &[f32], &[i8]) {
        (&self.act, &self.reward, &self.is_episode_end)
    }

    /// Number of transitions recorded after `slot`, `None` for dead slots.
    fn age(&self, slot: usize) -> Option<usize> {
        if slot >= self.capacity || self.len == 0 {
            return None;
        }
        let age = (self.head + self.capacity - 1 - slot) % self.capacity;
        if age < self.len {
            Some(age)
        } else {
            None
        }
    }

    /// Length of the n-step lookahead from `slot` and whether it hit an
    /// episode end. `None` if the lookahead runs into the write head.
    fn horizon(&self, slot: usize, age: usize, n_step: usize) -> Option<(usize, bool)> {
        for i in 0..n_step {
            if i > age {
                return None;
            }
            if self.is_episode_end((slot + i) % self.capacity) {
                return Some((i + 1, true));
            }
        }
        if n_step > age {
            None
        } else {
            Some((n_step, false))
        }
    }

    /// Whether `slot` can be sampled with a stack of `stack_depth` frames and
    /// an `n_step` lookahead.
    ///
    /// The `stack_depth - 1` preceding slots must be live and free of episode
    /// ends, and the lookahead must either reach an episode end or stop at a
    /// written bootstrap slot.
    pub fn valid_sample_window(&self, slot: usize, stack_depth: usize, n_step: usize) -> bool {
        let age = match self.age(slot) {
            Some(age) => age,
            None => return false,
        };
        if age + stack_depth > self.len {
            return false;
        }
        let preceding_end = (1..stack_depth)
            .any(|k| self.is_episode_end((slot + self.capacity - k) % self.capacity));
        if preceding_end {
            return false;
        }
        self.horizon(slot, age, n_step).is_some()
    }

    /// Discounted n-step return from `slot`, truncated at an episode end.
    pub fn n_step_return(&self, slot: usize, n_step: usize, gamma: f32) -> Option<NStepTarget> {
        let age = self.age(slot)?;
        let (len, terminated) = self.horizon(slot, age, n_step)?;
        let mut value = 0f32;
        let mut discount = 1f32;
        for i in 0..len {
            value += discount * self.reward[(slot + i) % self.capacity];
            discount *= gamma;
        }
        Some(NStepTarget {
            value,
            len,
            terminated,
        })
    }

    /// Number of live transitions flagged as episode ends.
    pub fn num_episode_ends(&self) -> usize {
        self.live_slots()
            .filter(|&slot| self.is_episode_end(slot))
            .count()
    }

    /// Sum of live rewards.
    pub fn sum_rewards(&self) -> f32 {
        self.live_slots().map(|slot| self.reward[slot]).sum()
    }

    fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        let start = (self.head + self.capacity - self.len) % self.capacity;
        (0..self.len).map(move |i| (start + i) % self.capacity)
    }
}
