//! Tuya envelope CRC-32 (spec §4.A).
//!
//! Tuya frames use the same parameters as CRC-32/ISO-HDLC (the "zlib"
//! variant): polynomial 0xEDB88320, initial value 0xFFFFFFFF, input and
//! output reflected, final XOR 0xFFFFFFFF. This is the exact variant the
//! `crc` crate ships as `CRC_32_ISO_HDLC`, which the teacher crate already
//! depends on for its own envelope checksum (see `protocol.rs`).
//!
//! The checksum covers `seq | cmd | length | payload` — everything between
//! the 4-byte prefix and the CRC field, never the prefix itself.

use crc::{CRC_32_ISO_HDLC, Crc};

const TUYA_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the Tuya envelope CRC over `data` (the bytes from `seq` through
/// the end of the payload, per spec §4.A).
pub fn checksum(data: &[u8]) -> u32 {
    TUYA_CRC.checksum(data)
}
