//! Errors raised by the Session Coordinator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("session has not been configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Device(#[from] mu_device::DeviceError),

    #[error(transparent)]
    Transfer(#[from] mu_transfer::TransferError),

    #[error(transparent)]
    Persistence(#[from] mu_file::PersistenceError),

    #[error(transparent)]
    Net(#[from] mu_net::NetError),

    #[error("session worker panicked")]
    WorkerPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}
