//! # mu-device
//!
//! Host-side USB control surface for the MegaMicro acquisition receiver
//! (C1): the control-transfer envelope, opcode table, five-state device
//! state machine, and the `DeviceBackend` implementation the Transfer
//! Engine drives during acquisition.

pub mod command;
pub mod device;
pub mod error;
pub mod state;

pub use device::UsbDevice;
pub use error::{DeviceError, Result};
pub use state::DeviceState;
