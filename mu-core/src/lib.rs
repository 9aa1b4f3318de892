//! # mu-core
//!
//! Foundational primitives shared across the MegaMicro acquisition
//! pipeline: a lock-free SPSC ring buffer, the bounded newest-wins frame
//! queue, cooperative cancellation, and the closed-enum frame sink.

pub mod cancel;
pub mod error;
pub mod queue;
pub mod sink;
pub mod spsc;

pub use cancel::CancellationToken;
pub use error::{MuStatus, Result};
pub use queue::{FrameQueue, TakeError};
pub use sink::Sink;
pub use spsc::{Consumer, Producer, SpscRingBuffer};
