//! Errors raised by the broadcast hub, wire protocol, and scheduler.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("malformed request: {0}")]
    ProtocolError(String),

    #[error("listener gone")]
    SubscriberGone,

    #[error("requested channel {0} is not part of the active session")]
    ChannelUnavailable(u32),

    #[error("scheduled job {task_id} overlaps job {conflicts_with}")]
    JobConflict { task_id: u64, conflicts_with: u64 },

    #[error("no scheduled job with id {0}")]
    JobNotFound(u64),

    #[error("path escapes the H5 root directory")]
    PathEscapesRoot,

    #[error("no file named {0} in the current directory")]
    FileNotFound(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
