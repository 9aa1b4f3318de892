//! # mu-transfer
//!
//! The Transfer Engine (C2) and the acquisition parameter value object: per-
//! completion frame validation against the Counter Invariant, the
//! misalignment restart protocol, and the shutdown protocol, all driven
//! against the [`backend::DeviceBackend`] capability trait so the engine is
//! agnostic to live USB acquisition vs. file playback.

pub mod backend;
pub mod engine;
pub mod error;
pub mod frame;
pub mod params;

pub use backend::{CompletionStatus, DeviceBackend};
pub use engine::{TransferEngine, MAX_RETRY_ATTEMPT};
pub use error::{Result, TransferError};
pub use frame::{Frame, Word};
pub use params::{
    AcquisitionParameters, Compression, Datatype, DeviceKind, H5Options, ParamBuilder,
    PlaybackOptions, ResolvedParameters, Trigger, VideoOptions,
};
