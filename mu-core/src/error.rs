//! Shared, C-compatible status codes for the MegaMicro workspace.
//!
//! Most crates in this workspace define their own `thiserror` enum. This
//! module instead provides a small `#[repr(C)]` status code, kept for the
//! handful of surfaces (the video sidecar's `VideoSink` trait) that report
//! status across a boundary too thin for a rich error type.

use std::fmt;

/// Coarse status codes shared across crate boundaries.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuStatus {
    /// No error occurred.
    Ok = 0,
    /// An invalid parameter value was provided.
    InvalidParameter = 1,
    /// The requested resource is not available (device, file, channel).
    Unavailable = 2,
    /// The operation is not legal in the current state.
    InvalidState = 3,
    /// The underlying I/O or transport layer failed.
    IoFailure = 4,
}

impl fmt::Display for MuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuStatus::Ok => write!(f, "no error"),
            MuStatus::InvalidParameter => write!(f, "invalid parameter"),
            MuStatus::Unavailable => write!(f, "resource unavailable"),
            MuStatus::InvalidState => write!(f, "invalid state"),
            MuStatus::IoFailure => write!(f, "I/O failure"),
        }
    }
}

impl std::error::Error for MuStatus {}

/// Result type alias using [`MuStatus`].
pub type Result<T> = std::result::Result<T, MuStatus>;
