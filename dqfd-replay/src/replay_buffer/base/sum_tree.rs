//! Sum tree for prioritized sampling.
//!
//! Code is adapted from https://github.com/jaromiru/AI-blog/blob/master/SumTree.py and
//! https://github.com/openai/baselines/blob/master/baselines/deepq/replay_buffer.py
use log::debug;
use segment_tree::{ops::MinIgnoreNaN, SegmentPoint};
use serde::{Deserialize, Serialize};

/// Specifies how to normalize the importance weights in a prioritized batch.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum WeightNormalizer {
    /// Normalize weights by the maximum weight within the sampled batch.
    Batch,

    /// Normalize weights by the maximum weight any stored transition could get.
    All,
}

/// Flat binary tree whose leaves are priorities and whose internal nodes are
/// the sums of their subtrees.
///
/// Leaves that were never written hold zero and are never drawn. Written
/// leaves are clamped to a positive floor.
#[derive(Debug)]
pub struct SumTree {
    floor: f32,
    capacity: usize,
    tree: Vec<f64>,
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,
}

impl SumTree {
    /// Creates a tree of `capacity` empty leaves; written priorities are
    /// never smaller than `floor`.
    pub fn new(capacity: usize, floor: f32) -> Self {
        debug_assert!(capacity > 0);
        debug_assert!(floor > 0.0);
        Self {
            floor,
            capacity,
            tree: vec![0f64; 2 * capacity - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
        }
    }

    /// Rebuilds a tree from its leaves. Zero leaves are treated as unwritten.
    pub fn from_leaves(leaves: &[f32], floor: f32) -> Self {
        let capacity = leaves.len();
        let mut tree = Self::new(capacity, floor);
        for (ix, &p) in leaves.iter().enumerate() {
            tree.tree[ix + capacity - 1] = p as f64;
            if p > 0.0 {
                tree.min_tree.modify(ix, p);
            }
        }
        for ix in (0..capacity - 1).rev() {
            tree.tree[ix] = tree.tree[2 * ix + 1] + tree.tree[2 * ix + 2];
        }
        tree
    }

    fn propagate(&mut self, mut ix: usize) {
        while ix != 0 {
            let parent = (ix - 1) / 2;
            self.tree[parent] = self.tree[2 * parent + 1] + self.tree[2 * parent + 2];
            ix = parent;
        }
    }

    /// Number of leaves.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The priority floor.
    pub fn floor(&self) -> f32 {
        self.floor
    }

    /// Sum of all leaves.
    pub fn total(&self) -> f64 {
        self.tree[0]
    }

    /// Smallest written priority, `f32::MAX` if nothing was written.
    pub fn min(&self) -> f32 {
        self.min_tree.query(0, self.capacity)
    }

    /// Priority at leaf `ix`.
    pub fn get(&self, ix: usize) -> f32 {
        self.tree[ix + self.capacity - 1] as f32
    }

    /// All leaves in slot order.
    pub fn leaves(&self) -> Vec<f32> {
        self.tree[self.capacity - 1..]
            .iter()
            .map(|&p| p as f32)
            .collect()
    }

    /// Sets the priority of leaf `ix` and returns the value actually stored.
    ///
    /// Non-positive and NaN priorities are replaced with the floor.
    pub fn update(&mut self, ix: usize, p: f32) -> f32 {
        debug_assert!(ix < self.capacity);

        let p = if p >= self.floor {
            p
        } else {
            debug!("Priority {:?} at slot {} clamped to {:?}", p, ix, self.floor);
            self.floor
        };
        self.min_tree.modify(ix, p);
        let leaf = ix + self.capacity - 1;
        self.tree[leaf] = p as f64;
        self.propagate(leaf);
        p
    }

    /// Returns the leaf whose cumulative interval contains `s`, for
    /// `0 <= s < total()`.
    pub fn sample(&self, s: f64) -> usize {
        let mut ix = 0;
        let mut s = s;
        loop {
            let left = 2 * ix + 1;
            if left >= self.tree.len() {
                break;
            }
            let right = left + 1;
            if s < self.tree[left] || self.tree[right] <= 0.0 {
                ix = left;
            } else {
                s -= self.tree[left];
                ix = right;
            }
        }
        debug_assert!(ix >= self.capacity - 1);
        ix + 1 - self.capacity
    }
}
