//! The device controller's state machine.
//!
//! `start` is legal only from `Configured`; `stop` is legal only from
//! `Running`. The controller performs no retries of its own — retries are
//! the Transfer Engine's concern.

/// Lifecycle states of a [`crate::device::UsbDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No USB handle is held.
    Closed,
    /// A handle is held but `reset_full` has not yet been confirmed.
    Opened,
    /// Clock divisor, datatype, and channel activation have been written.
    Configured,
    /// `start` has been issued; bulk transfers may be in flight.
    Running,
    /// `stop` has been issued; the device is powered but idle.
    Stopped,
}

impl DeviceState {
    /// Whether `start()` may be called from this state.
    pub fn can_start(self) -> bool {
        matches!(self, DeviceState::Configured)
    }

    /// Whether `stop()` may be called from this state.
    pub fn can_stop(self) -> bool {
        matches!(self, DeviceState::Running)
    }
}
