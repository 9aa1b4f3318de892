//! Errors raised by the video sidecar.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VideoError>;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video sink failed: {0}")]
    SinkFailure(String),

    #[error("sidecar worker panicked")]
    WorkerPanicked,
}
