//! Errors in the library.
use thiserror::Error;

/// Errors raised by replay buffers and the dual sampler.
///
/// Functions in this crate return [`anyhow::Result`]; the underlying
/// [`ReplayError`] can be recovered with `downcast_ref`.
#[derive(Error, Debug, PartialEq)]
pub enum ReplayError {
    /// Invalid construction parameters or bulk-load arrays.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not enough valid slots to fill the requested batch.
    #[error("Sampling unavailable: requested {requested} rows, {available} available, gave up after {draws} draws")]
    SamplingUnavailable {
        /// Number of rows requested.
        requested: usize,

        /// Number of rows that could have been supplied: valid slots when
        /// sampling a batch, history frames when reading a window.
        available: usize,

        /// Number of draws made before giving up.
        draws: usize,
    },

    /// Snapshot missing, corrupt or not matching the configuration.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A slot index outside the buffer.
    #[error("Slot {slot} is out of range for capacity {capacity}")]
    SlotOutOfRange {
        /// The offending slot.
        slot: usize,

        /// Capacity of the buffer.
        capacity: usize,
    },

    /// Slots and TD-errors passed to a priority update differ in length.
    #[error("Got {slots} slots but {td_errors} TD-errors")]
    LengthMismatch {
        /// Number of slots.
        slots: usize,

        /// Number of TD-errors.
        td_errors: usize,
    },
}
