//! Errors raised building acquisition parameters or running the transfer
//! engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors raised validating [`crate::params::AcquisitionParameters`] or
/// running [`crate::engine::TransferEngine`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("`mems` must name at least one channel")]
    NoChannelsSelected,

    #[error("channel {index} out of range (device exposes {total_beams} beams, {max} channels)")]
    ChannelOutOfRange {
        index: u32,
        total_beams: u32,
        max: u32,
    },

    #[error("counter_skip requires counter to be enabled")]
    CounterSkipRequiresCounter,

    #[error("buffers_number must be >= 2, got {0}")]
    TooFewBuffers(u32),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error(
        "counter misalignment: expected {expected} contiguous samples, counter advanced by {actual}"
    )]
    Misalignment { expected: u32, actual: i64 },

    #[error("bulk transfer timed out")]
    TransferTimeout,

    #[error("session exceeded {0} consecutive misalignments and was declared fatal")]
    Fatal(u32),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}
