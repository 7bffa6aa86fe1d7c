//! Circular store of single frames.
use crate::error::ReplayError;
use anyhow::Result;
use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Preallocated ring of `capacity` frames of one fixed shape.
///
/// Stacked observations are never stored; a window of the `depth` most recent
/// frames ending at a slot is rebuilt from the ring when requested.
#[derive(Debug, Clone)]
pub struct FrameArena {
    frame_shape: Vec<usize>,
    frame_len: usize,
    capacity: usize,
    head: usize,
    len: usize,
    data: Vec<u8>,
}

impl FrameArena {
    /// Allocates the whole ring up front.
    pub fn new(frame_shape: &[usize], capacity: usize) -> Self {
        let frame_len = frame_shape.iter().product::<usize>();
        Self {
            frame_shape: frame_shape.to_vec(),
            frame_len,
            capacity,
            head: 0,
            len: 0,
            data: vec![0; frame_len * capacity],
        }
    }

    /// Rebuilds an arena from raw frame bytes in slot order.
    pub(crate) fn from_raw(
        frame_shape: &[usize],
        capacity: usize,
        head: usize,
        len: usize,
        data: Vec<u8>,
    ) -> Self {
        let frame_len = frame_shape.iter().product::<usize>();
        debug_assert_eq!(data.len(), frame_len * capacity);
        Self {
            frame_shape: frame_shape.to_vec(),
            frame_len,
            capacity,
            head,
            len,
            data,
        }
    }

    /// Raw frame bytes in slot order.
    pub(crate) fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Shape of a single frame.
    pub fn frame_shape(&self) -> &[usize] {
        &self.frame_shape
    }

    /// Number of elements of a single frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of frames written and not yet overwritten.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Slot the next frame will be written to.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Writes `frame` at the head, advances the head and returns the slot.
    pub fn push(&mut self, frame: ArrayViewD<'_, u8>) -> Result<usize> {
        if frame.shape() != self.frame_shape.as_slice() {
            return Err(ReplayError::Configuration(format!(
                "frame shape {:?} does not match {:?}",
                frame.shape(),
                self.frame_shape
            ))
            .into());
        }
        let slot = self.head;
        let offset = slot * self.frame_len;
        for (dst, src) in self.data[offset..offset + self.frame_len]
            .iter_mut()
            .zip(frame.iter())
        {
            *dst = *src;
        }
        self.head = (self.head + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        Ok(slot)
    }

    /// Number of frames written after `slot`, or `None` if `slot` holds no
    /// live frame.
    pub fn age(&self, slot: usize) -> Option<usize> {
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

    /// Whether `depth` live frames end at `end_slot`.
    pub fn has_history(&self, end_slot: usize, depth: usize) -> bool {
        match self.age(end_slot) {
            Some(age) => age + depth <= self.len,
            None => false,
        }
    }

    /// Appends the `depth` frames ending at `end_slot`, oldest first, to `dst`.
    pub(crate) fn extend_window(&self, end_slot: usize, depth: usize, dst: &mut Vec<u8>) {
        debug_assert!(self.has_history(end_slot, depth));
        for k in (0..depth).rev() {
            let slot = (end_slot + self.capacity - k) % self.capacity;
            let offset = slot * self.frame_len;
            dst.extend_from_slice(&self.data[offset..offset + self.frame_len]);
        }
    }

    /// Returns the `depth` frames ending at `end_slot` as an array of shape
    /// `[depth, frame_shape..]`, oldest first.
    pub fn get_window(&self, end_slot: usize, depth: usize) -> Result<ArrayD<u8>> {
        if !self.has_history(end_slot, depth) {
            return Err(ReplayError::SamplingUnavailable {
                requested: depth,
                available: self.age(end_slot).map_or(0, |age| self.len - age),
                draws: 0,
            }
            .into());
        }
        let mut buf = Vec::with_capacity(depth * self.frame_len);
        self.extend_window(end_slot, depth, &mut buf);
        let mut shape = vec![depth];
        shape.extend_from_slice(&self.frame_shape);
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), buf)?)
    }
}
