//! USB control-transfer envelope and opcode table.
//!
//! Requests `0xB0..0xB4` carry 1- to 5-byte FPGA commands; `0xC0` is the
//! FX3 reset and `0xC4` the external FPGA reset. Opcode is always data
//! byte 0.

use rusb::{Direction, Recipient, RequestType, request_type};

/// Vendor request values used on the device's control endpoint.
pub mod request {
    pub const FPGA_CMD_1: u8 = 0xB0;
    pub const FPGA_CMD_2: u8 = 0xB1;
    pub const FPGA_CMD_3: u8 = 0xB2;
    pub const FPGA_CMD_4: u8 = 0xB3;
    pub const FPGA_CMD_5: u8 = 0xB4;
    pub const FX3_RESET: u8 = 0xC0;
    pub const FPGA_EXT_RESET: u8 = 0xC4;
}

/// Opcodes carried in data byte 0 of an FPGA command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Reset = 0,
    Init = 1,
    Start = 2,
    Stop = 3,
    Count = 4,
    Active = 5,
    Purge = 6,
    Datatype = 9,
}

/// Datatype sub-codes for the `DATATYPE` opcode's payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatatypeCode {
    Int32 = 0,
    Float32 = 1,
}

/// Bitmask-selected vendor control-write request type: OUT, vendor,
/// device-recipient.
pub fn request_type_byte() -> u8 {
    request_type(Direction::Out, RequestType::Vendor, Recipient::Device)
}

/// Build the data payload for a command whose opcode takes no further
/// bytes (e.g. `RESET`, `PURGE`).
pub fn envelope(opcode: Opcode) -> Vec<u8> {
    vec![opcode as u8]
}

/// Build the data payload for a command with one payload byte, e.g.
/// `DATATYPE` or the `ACTIVE` aux-channel control byte.
pub fn envelope_with_byte(opcode: Opcode, payload: u8) -> Vec<u8> {
    vec![opcode as u8, payload]
}

/// Build the data payload for an `ACTIVE` beam command: opcode, beam
/// index, 8-bit microphone bitmap for that beam.
pub fn envelope_beam(opcode: Opcode, beam: u8, bitmap: u8) -> Vec<u8> {
    vec![opcode as u8, beam, bitmap]
}

/// Build the data payload for `COUNT`, a little-endian u32 sample count
/// (0 meaning "stream until stop").
pub fn envelope_count(n: u32) -> Vec<u8> {
    let mut data = vec![Opcode::Count as u8];
    data.extend_from_slice(&n.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_opcode_as_first_byte() {
        assert_eq!(envelope(Opcode::Reset), vec![0]);
        assert_eq!(envelope(Opcode::Purge), vec![6]);
    }

    #[test]
    fn envelope_with_byte_appends_payload() {
        assert_eq!(envelope_with_byte(Opcode::Datatype, DatatypeCode::Float32 as u8), vec![9, 1]);
    }

    #[test]
    fn envelope_beam_orders_opcode_beam_bitmap() {
        assert_eq!(envelope_beam(Opcode::Active, 2, 0b1010_0001), vec![5, 2, 0b1010_0001]);
    }

    #[test]
    fn envelope_count_is_little_endian() {
        let data = envelope_count(0x0102_0304);
        assert_eq!(data, vec![4, 0x04, 0x03, 0x02, 0x01]);
    }
}
