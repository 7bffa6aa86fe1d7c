use anyhow::Result;
use dqfd_replay::{
    Experience, ExperienceBufferBase, ReplayBuffer, ReplayBufferBase, ReplayBufferConfig,
    ReplayError,
};
use ndarray::{ArrayD, IxDyn};
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};
use tempdir::TempDir;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> ReplayBufferConfig {
    ReplayBufferConfig::default()
        .frame_shape(vec![3, 3])
        .max_frame_num(128)
        .n_step(5)
        .seed(1)
}

fn filled_buffer() -> Result<ReplayBuffer> {
    let mut buffer = ReplayBuffer::build(&config())?;
    for t in 0..300usize {
        let frame = ArrayD::from_elem(IxDyn(&[3, 3]), (t % 251) as u8);
        let done = t % 37 == 36;
        buffer.push(Experience::new(frame, (t % 6) as i64, (t % 3) as f32, done))?;
    }
    for _ in 0..10 {
        let batch = buffer.sample(16)?;
        let td_errs = batch
            .ix_sample
            .iter()
            .map(|&ix| ix as f32 * 0.1 - 3.0)
            .collect::<Vec<_>>();
        buffer.update_priorities(&batch.ix_sample, &td_errs)?;
    }
    Ok(buffer)
}

fn is_persistence_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ReplayError>(),
        Some(ReplayError::Persistence(_))
    )
}

#[test]
fn test_restore_reproduces_buffer() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    let path = dir.path().join("online.bin");

    let mut saved = filled_buffer()?;
    saved.persist(&path)?;
    let mut restored = ReplayBuffer::restore(&config(), &path)?;

    assert_eq!(restored.len(), saved.len());
    assert_eq!(restored.total_priority(), saved.total_priority());
    assert_eq!(restored.max_priority(), saved.max_priority());
    assert_eq!(restored.n_opts(), saved.n_opts());
    assert_eq!(restored.beta(), saved.beta());
    assert_eq!(restored.num_episode_ends(), saved.num_episode_ends());
    assert_eq!(restored.sum_rewards(), saved.sum_rewards());
    for slot in 0..saved.capacity() {
        assert_eq!(restored.priority(slot), saved.priority(slot));
        assert_eq!(restored.is_valid(slot), saved.is_valid(slot));
    }

    saved.reseed(99);
    restored.reseed(99);
    for _ in 0..5 {
        assert_eq!(saved.sample(16)?, restored.sample(16)?);
    }
    Ok(())
}

#[test]
fn test_build_restores_from_config() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    let path = dir.path().join("online.bin");
    let saved = filled_buffer()?;
    saved.persist(&path)?;

    let config = config().restore_path(Some(path));
    let restored = ReplayBuffer::build(&config)?;
    assert_eq!(restored.len(), saved.len());
    assert_eq!(restored.total_priority(), saved.total_priority());
    Ok(())
}

#[test]
fn test_missing_snapshot_is_an_error() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    let config = config().restore_path(Some(dir.path().join("missing.bin")));
    let err = ReplayBuffer::build(&config).err().unwrap();
    assert!(is_persistence_error(&err));
    Ok(())
}

#[test]
fn test_corrupt_snapshot_is_an_error() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    let path = dir.path().join("corrupt.bin");
    File::create(&path)?.write_all(b"definitely not a replay buffer")?;
    let err = ReplayBuffer::restore(&config(), &path).err().unwrap();
    assert!(is_persistence_error(&err));
    Ok(())
}

#[test]
fn test_mismatched_snapshot_is_an_error() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    let path = dir.path().join("online.bin");
    filled_buffer()?.persist(&path)?;

    let other_shape = config().frame_shape(vec![4, 4]);
    let err = ReplayBuffer::restore(&other_shape, &path).err().unwrap();
    assert!(is_persistence_error(&err));

    let other_capacity = config().max_frame_num(256);
    let err = ReplayBuffer::restore(&other_capacity, &path).err().unwrap();
    assert!(is_persistence_error(&err));

    let uniform = config().per_config(None);
    let err = ReplayBuffer::restore(&uniform, &path).err().unwrap();
    assert!(is_persistence_error(&err));
    Ok(())
}

/// Overwrites the stored length of a snapshot of a `[3, 3]` frame buffer.
///
/// In the bincode layout the length follows the version (4 bytes), the frame
/// shape (8-byte length plus two 8-byte dims), the capacity and the head.
fn rewrite_len(path: &Path, head: u64, len: u64) -> Result<()> {
    const HEAD: usize = 4 + 8 + 2 * 8 + 8;
    const LEN: usize = HEAD + 8;
    let mut bytes = fs::read(path)?;
    assert_eq!(&bytes[HEAD..LEN], &head.to_le_bytes()[..]);
    bytes[LEN..LEN + 8].copy_from_slice(&len.to_le_bytes());
    fs::write(path, bytes)?;
    Ok(())
}

#[test]
fn test_snapshot_claiming_unwritten_slots_is_an_error() -> Result<()> {
    init();
    let dir = TempDir::new("replay_snapshot")?;
    for config in vec![config(), config().per_config(None)] {
        let path = dir.path().join("short.bin");
        let mut buffer = ReplayBuffer::build(&config)?;
        for t in 0..4u8 {
            let frame = ArrayD::from_elem(IxDyn(&[3, 3]), t);
            buffer.push(Experience::new(frame, 0, 0.0, false))?;
        }
        buffer.persist(&path)?;
        assert!(ReplayBuffer::restore(&config, &path).is_ok());

        rewrite_len(&path, 4, 12)?;
        let err = ReplayBuffer::restore(&config, &path).err().unwrap();
        assert!(is_persistence_error(&err));
    }
    Ok(())
}
