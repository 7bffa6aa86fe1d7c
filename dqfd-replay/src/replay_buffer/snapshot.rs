//! On-disk snapshot of a replay buffer.
use super::ReplayBufferConfig;
use crate::error::ReplayError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Frame store, transition ring, priorities and counters of a buffer.
///
/// The arrays are stored in slot order, so a restored buffer draws from the
/// same distribution as the one that was saved.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub(crate) struct Snapshot<'a> {
    pub version: u32,
    pub frame_shape: Vec<usize>,
    pub capacity: usize,
    pub head: usize,
    pub len: usize,
    pub frames: Cow<'a, [u8]>,
    pub act: Cow<'a, [i64]>,
    pub reward: Cow<'a, [f32]>,
    pub is_episode_end: Cow<'a, [i8]>,
    /// Leaf priorities; empty for uniform buffers.
    pub priorities: Cow<'a, [f32]>,
    pub max_priority: f32,
    pub n_opts: usize,
}

fn persistence_error(msg: String) -> anyhow::Error {
    ReplayError::Persistence(msg).into()
}

impl Snapshot<'_> {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| persistence_error(format!("cannot create {:?}: {}", path, e)))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .map_err(|e| persistence_error(format!("cannot write {:?}: {}", path, e)))?;
        writer
            .flush()
            .map_err(|e| persistence_error(format!("cannot write {:?}: {}", path, e)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Snapshot<'static>> {
        let file = File::open(path)
            .map_err(|e| persistence_error(format!("cannot open {:?}: {}", path, e)))?;
        let snapshot: Snapshot<'static> = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| persistence_error(format!("corrupt snapshot {:?}: {}", path, e)))?;
        Ok(snapshot)
    }

    /// Checks the snapshot against the configuration it is restored into.
    pub fn check(&self, config: &ReplayBufferConfig) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(persistence_error(format!(
                "snapshot version {} is not supported",
                self.version
            )));
        }
        if self.capacity != config.max_frame_num || self.frame_shape != config.frame_shape {
            return Err(persistence_error(format!(
                "snapshot of capacity {} and frame shape {:?} does not match capacity {} and frame shape {:?}",
                self.capacity, self.frame_shape, config.max_frame_num, config.frame_shape
            )));
        }
        let frame_len = self.frame_shape.iter().product::<usize>();
        let n_priorities = if config.per_config.is_some() {
            self.capacity
        } else {
            0
        };
        let aligned = self.frames.len() == frame_len * self.capacity
            && self.act.len() == self.capacity
            && self.reward.len() == self.capacity
            && self.is_episode_end.len() == self.capacity
            && self.priorities.len() == n_priorities;
        if !aligned {
            return Err(persistence_error("snapshot arrays are not aligned".into()));
        }
        if self.head >= self.capacity || self.len > self.capacity {
            return Err(persistence_error(format!(
                "head {} and length {} are out of range",
                self.head, self.len
            )));
        }
        if self.len < self.capacity && self.head != self.len {
            return Err(persistence_error(format!(
                "head {} does not follow {} transitions written from slot 0",
                self.head, self.len
            )));
        }
        if let Some(per_config) = &config.per_config {
            self.check_priorities(per_config.epsilon)?;
        }
        Ok(())
    }

    /// Written slots must hold priorities of at least `floor`, unwritten
    /// slots must hold zero.
    fn check_priorities(&self, floor: f32) -> Result<()> {
        let is_written = |slot: usize| self.len == self.capacity || slot < self.len;
        let consistent = self.priorities.iter().enumerate().all(|(slot, &p)| {
            if is_written(slot) {
                p >= floor && p.is_finite()
            } else {
                p == 0.0
            }
        });
        if !consistent {
            return Err(persistence_error(format!(
                "snapshot priorities do not match its {} written slots",
                self.len
            )));
        }
        if !(self.max_priority >= floor) || self.max_priority.is_infinite() {
            return Err(persistence_error(format!(
                "max priority {} is below the floor {}",
                self.max_priority, floor
            )));
        }
        Ok(())
    }
}
