//! The `DeviceBackend` capability trait.
//!
//! The Transfer Engine is polymorphic over where completions come from:
//! a live USB receiver (`mu-device::UsbDevice`) or a file-playback reader
//! standing in for C5's fan-out (`mu-file`). Both implement this trait;
//! `TransferEngine` only ever talks to `dyn DeviceBackend`.

use std::time::Duration;

use crate::error::Result;

/// Outcome of one bulk-in completion.
#[derive(Debug)]
pub enum CompletionStatus {
    /// The transfer completed with a full payload.
    Completed(Vec<u8>),
    /// The transfer was cancelled (shutdown in progress).
    Cancelled,
    /// The device disappeared.
    NoDevice,
    /// A transport-level error occurred.
    Error,
    /// The endpoint stalled.
    Stall,
    /// The host-side buffer overflowed.
    Overflow,
    /// No data arrived before the completion timeout.
    Timeout,
}

/// A source of bulk-in completions the Transfer Engine can drive.
///
/// Implementors own exactly one in-flight read at a time from the
/// engine's perspective; `buffers_number` ahead-of-time submission is
/// approximated by the engine calling `submit` that many times before
/// the first `poll_completion`.
pub trait DeviceBackend: Send {
    /// Wall-clock duration represented by one buffer at the configured
    /// sampling frequency and buffer length.
    fn buffer_duration(&self) -> f64;

    /// Queue one more bulk-in request.
    fn submit(&mut self) -> Result<()>;

    /// Block until the next queued request completes or `timeout` elapses
    /// with no data (classified as [`CompletionStatus::Timeout`]).
    fn poll_completion(&mut self, timeout: Duration) -> CompletionStatus;

    /// FX3-reset subset of `reset_full`, used by the restart protocol.
    fn reset_partial(&mut self) -> Result<()>;

    /// Issue `stop(handle)`.
    fn issue_stop(&mut self) -> Result<()>;

    /// Issue the full five-step `reset_full` sequence.
    fn issue_full_reset(&mut self) -> Result<()>;

    /// Resubmit a short-timeout transfer to drain the device FIFO,
    /// discarding whatever bytes arrive. Used only during shutdown flush.
    fn drain_once(&mut self, timeout: Duration);
}
