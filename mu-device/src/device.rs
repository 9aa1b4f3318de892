//! `UsbDevice`: the host-side control surface for a MegaMicro USB
//! receiver, and its `DeviceBackend` implementation for the Transfer
//! Engine.

use std::time::{Duration, Instant};

use mu_transfer::{CompletionStatus, DeviceBackend, Datatype, Trigger};
use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, warn};

use crate::{
    command::{self, Opcode, DatatypeCode},
    error::{DeviceError, Result},
    state::DeviceState,
};

/// Bulk-in endpoint address carrying sample data.
const BULK_IN_ENDPOINT: u8 = 0x81;
const USB_INTERFACE: u8 = 0;
const RESET_SETTLE: Duration = Duration::from_millis(10);
const CLOCK_SETTLE: Duration = Duration::from_secs(1);
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Controller for one physical (or virtual) MegaMicro USB receiver.
///
/// Deliberately thin: it performs no retries of its own. Retries after a
/// misalignment are the Transfer Engine's concern.
pub struct UsbDevice {
    handle: DeviceHandle<GlobalContext>,
    state: DeviceState,
    channels_per_frame: usize,
    buffer_length: usize,
    sampling_frequency: f64,
}

impl UsbDevice {
    /// Open the first device matching `vendor_id`/`product_id` and claim
    /// its single interface.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let handle = rusb::open_device_with_vid_pid(vendor_id, product_id).ok_or(
            DeviceError::DeviceMissing {
                vendor_id,
                product_id,
            },
        )?;
        handle.claim_interface(USB_INTERFACE)?;
        debug!(vendor_id, product_id, "opened MegaMicro USB receiver");
        Ok(Self {
            handle,
            state: DeviceState::Opened,
            channels_per_frame: 0,
            buffer_length: 0,
            sampling_frequency: 0.0,
        })
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Set the frame geometry used to size bulk-in reads. Must be called
    /// before the device transitions to `Running`.
    pub fn set_geometry(&mut self, channels_per_frame: usize, buffer_length: usize, sampling_frequency: f64) {
        self.channels_per_frame = channels_per_frame;
        self.buffer_length = buffer_length;
        self.sampling_frequency = sampling_frequency;
    }

    fn write_control(&self, request: u8, data: &[u8]) -> Result<()> {
        let written = self
            .handle
            .write_control(command::request_type_byte(), request, 0, 0, data, CONTROL_TIMEOUT)?;
        if written != data.len() {
            warn!(request, expected = data.len(), actual = written, "control write length mismatch");
        }
        debug!(request, len = data.len(), "control write");
        Ok(())
    }

    /// Five-step sequence: FX3 reset, external FPGA reset, FPGA soft
    /// reset byte, external FPGA reset, FX3 reset, each separated by a
    /// short settle wait.
    pub fn reset_full(&mut self) -> Result<()> {
        self.write_control(command::request::FX3_RESET, &[])?;
        std::thread::sleep(RESET_SETTLE);
        self.write_control(command::request::FPGA_EXT_RESET, &[])?;
        std::thread::sleep(RESET_SETTLE);
        self.write_control(command::request::FPGA_CMD_1, &command::envelope(Opcode::Reset))?;
        std::thread::sleep(RESET_SETTLE);
        self.write_control(command::request::FPGA_EXT_RESET, &[])?;
        std::thread::sleep(RESET_SETTLE);
        self.write_control(command::request::FX3_RESET, &[])?;
        std::thread::sleep(RESET_SETTLE);
        self.state = DeviceState::Opened;
        Ok(())
    }

    /// FX3-reset subset used by the restart protocol: just the first
    /// and last steps of `reset_full`, skipping the FPGA soft reset.
    pub fn reset_partial(&mut self) -> Result<()> {
        self.write_control(command::request::FX3_RESET, &[])?;
        std::thread::sleep(RESET_SETTLE);
        self.write_control(command::request::FX3_RESET, &[])?;
        Ok(())
    }

    /// Powers the MEMs; requires a 1s settle wait before the first sample.
    pub fn set_clock_divisor(&mut self, divisor: u8) -> Result<()> {
        self.write_control(command::request::FPGA_CMD_2, &command::envelope_with_byte(Opcode::Init, divisor))?;
        std::thread::sleep(CLOCK_SETTLE);
        self.mark_configured();
        Ok(())
    }

    /// `0` means stream until stop.
    pub fn set_sample_count(&mut self, n: u32) -> Result<()> {
        self.write_control(command::request::FPGA_CMD_5, &command::envelope_count(n))?;
        self.mark_configured();
        Ok(())
    }

    pub fn set_datatype(&mut self, datatype: Datatype) -> Result<()> {
        let code = match datatype {
            Datatype::Int32 => DatatypeCode::Int32,
            Datatype::Float32 => DatatypeCode::Float32,
        };
        self.write_control(command::request::FPGA_CMD_2, &command::envelope_with_byte(Opcode::Datatype, code as u8))?;
        self.mark_configured();
        Ok(())
    }

    /// Encodes each 8-mic beam as an 8-bit bitmap and sends one command
    /// per beam whose mask is non-zero.
    pub fn activate_mems(&mut self, mems: &[u32], total_beams: u32) -> Result<()> {
        let beam_masks = compute_beam_masks(mems, total_beams)?;
        for (beam, &mask) in beam_masks.iter().enumerate() {
            if mask != 0 {
                self.write_control(
                    command::request::FPGA_CMD_3,
                    &command::envelope_beam(Opcode::Active, beam as u8, mask),
                )?;
            }
        }
        self.mark_configured();
        Ok(())
    }

    /// One command with a single control byte: bits 0-5 analogs, bit 6
    /// status, bit 7 counter.
    pub fn activate_aux(&mut self, counter: bool, status: bool, analogs: &[u32]) -> Result<()> {
        let mut byte: u8 = 0;
        for &index in analogs {
            if index < 6 {
                byte |= 1 << index;
            }
        }
        if status {
            byte |= 1 << 6;
        }
        if counter {
            byte |= 1 << 7;
        }
        self.write_control(command::request::FPGA_CMD_2, &command::envelope_with_byte(Opcode::Active, byte))?;
        self.mark_configured();
        Ok(())
    }

    fn mark_configured(&mut self) {
        if matches!(self.state, DeviceState::Opened) {
            self.state = DeviceState::Configured;
        }
    }

    pub fn start(&mut self, trigger: Trigger) -> Result<()> {
        if !self.state.can_start() {
            return Err(DeviceError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let payload = match trigger {
            Trigger::Soft => command::envelope(Opcode::Start),
            Trigger::ExternalRisingEdge => command::envelope_with_byte(Opcode::Start, 1),
        };
        self.write_control(command::request::FPGA_CMD_1, &payload)?;
        self.state = DeviceState::Running;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.state.can_stop() {
            return Err(DeviceError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }
        self.write_control(command::request::FPGA_CMD_1, &command::envelope(Opcode::Stop))?;
        self.state = DeviceState::Stopped;
        Ok(())
    }

    pub fn power_off(&mut self) -> Result<()> {
        self.write_control(command::request::FPGA_CMD_1, &command::envelope(Opcode::Purge))?;
        self.state = DeviceState::Closed;
        Ok(())
    }
}

impl DeviceBackend for UsbDevice {
    fn buffer_duration(&self) -> f64 {
        if self.sampling_frequency <= 0.0 {
            0.0
        } else {
            self.buffer_length as f64 / self.sampling_frequency
        }
    }

    fn submit(&mut self) -> mu_transfer::Result<()> {
        // Ahead-of-time submission is approximated by performing the
        // blocking read in `poll_completion`; `submit` only validates
        // that the device is actually running.
        if self.state != DeviceState::Running {
            return Err(mu_transfer::TransferError::TransportError(
                "device not running".into(),
            ));
        }
        Ok(())
    }

    fn poll_completion(&mut self, timeout: Duration) -> CompletionStatus {
        let mut buf = vec![0u8; self.channels_per_frame * self.buffer_length * 4];
        match self.handle.read_bulk(BULK_IN_ENDPOINT, &mut buf, timeout) {
            Ok(len) => {
                buf.truncate(len);
                CompletionStatus::Completed(buf)
            }
            Err(rusb::Error::Timeout) => CompletionStatus::Timeout,
            Err(rusb::Error::NoDevice) => CompletionStatus::NoDevice,
            Err(rusb::Error::Pipe) => CompletionStatus::Stall,
            Err(rusb::Error::Overflow) => CompletionStatus::Overflow,
            Err(rusb::Error::Interrupted) => CompletionStatus::Cancelled,
            Err(_) => CompletionStatus::Error,
        }
    }

    fn reset_partial(&mut self) -> mu_transfer::Result<()> {
        UsbDevice::reset_partial(self).map_err(|e| mu_transfer::TransferError::TransportError(e.to_string()))
    }

    fn issue_stop(&mut self) -> mu_transfer::Result<()> {
        UsbDevice::stop(self).map_err(|e| mu_transfer::TransferError::TransportError(e.to_string()))
    }

    fn issue_full_reset(&mut self) -> mu_transfer::Result<()> {
        UsbDevice::reset_full(self).map_err(|e| mu_transfer::TransferError::TransportError(e.to_string()))
    }

    fn drain_once(&mut self, timeout: Duration) {
        let mut buf = vec![0u8; (self.channels_per_frame * self.buffer_length * 4).max(64)];
        let deadline = Instant::now() + timeout;
        let _ = self.handle.read_bulk(BULK_IN_ENDPOINT, &mut buf, timeout);
        // Discard whatever arrived; this leg's only purpose is to drain
        // the FIFO before the full reset.
        let _ = deadline;
    }
}

/// Pure helper behind [`UsbDevice::activate_mems`], split out so the
/// beam-encoding logic can be tested without an open USB handle.
fn compute_beam_masks(mems: &[u32], total_beams: u32) -> Result<Vec<u8>> {
    let max = total_beams * 8;
    let mut beam_masks = vec![0u8; total_beams as usize];
    for &index in mems {
        if index >= max {
            return Err(DeviceError::ChannelOutOfRange {
                index,
                total_beams,
                max,
            });
        }
        let beam = (index / 8) as usize;
        let bit = index % 8;
        beam_masks[beam] |= 1 << bit;
    }
    Ok(beam_masks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_masks_set_correct_bits() {
        let masks = compute_beam_masks(&[0, 1, 9, 16], 4).unwrap();
        assert_eq!(masks, vec![0b0000_0011, 0b0000_0010, 0b0000_0001, 0]);
    }

    #[test]
    fn beam_masks_reject_out_of_range_index() {
        let result = compute_beam_masks(&[32], 4);
        assert!(matches!(result, Err(DeviceError::ChannelOutOfRange { index: 32, total_beams: 4, max: 32 })));
    }

    #[test]
    fn empty_mems_produces_all_zero_masks() {
        let masks = compute_beam_masks(&[], 2).unwrap();
        assert_eq!(masks, vec![0, 0]);
    }
}
