//! Errors raised recording to or reading from H5 files.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("requested channel {0} is not present in this file")]
    ChannelUnavailable(u32),

    #[error("playback source exhausted")]
    PlaybackExhausted,

    #[error("no files found at playback path {0}")]
    EmptySource(String),
}
