//! CRC-16/CCITT used by the synchronous frame family.
//!
//! Polynomial 0x1021, initial value 0, no reflection, no final xor (the
//! XMODEM parameter set), computed over the frame bytes as they appear on the
//! wire.

use ::crc::{CRC_16_XMODEM, Crc};

const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/CCITT of `data`, starting from 0.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CRC_CCITT.checksum(data)
}
