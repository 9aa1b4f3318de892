//! Errors raised by the device controller.

use thiserror::Error;

/// Errors raised opening, configuring, or controlling a MegaMicro USB
/// receiver.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device matching the requested vendor/product ID was found.
    #[error("device not found (vid={vendor_id:#06x}, pid={product_id:#06x})")]
    DeviceMissing {
        vendor_id: u16,
        product_id: u16,
    },

    /// A control or bulk transfer failed at the USB transport layer.
    #[error("USB transport error: {0}")]
    TransportError(#[from] rusb::Error),

    /// A microphone index fell outside the device's addressable beam range.
    #[error("channel {index} out of range (device exposes {total_beams} beams, {max} channels)")]
    ChannelOutOfRange {
        index: u32,
        total_beams: u32,
        max: u32,
    },

    /// The requested operation is not legal in the controller's current
    /// state.
    #[error("operation '{operation}' is not legal in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::state::DeviceState,
    },
}

pub type Result<T> = std::result::Result<T, DeviceError>;
