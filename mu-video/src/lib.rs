//! # mu-video
//!
//! The Video Sidecar (C7): an optional monitoring stream run alongside an
//! acquisition session. Camera capture and encoding are explicitly out of
//! scope; this crate owns only the thread lifecycle, cancellation, and
//! file-rolling contract a real backend plugs into via [`VideoSink`].

pub mod error;
pub mod sidecar;

pub use error::{Result, VideoError};
pub use sidecar::{NullVideoSink, Sidecar, VideoSink};
