//! CRC-24 checksum validation for Mode S frames

use super::parser::ParseError;

/// CRC-24 polynomial used in Mode S (0x1FFF409)
const CRC24_POLY: u32 = 0x1FFF409;

/// Compute CRC-24 checksum over the first `bits` of a frame
pub fn compute_crc24(msg: &[u8], bits: usize) -> u32 {
    let mut crc: u32 = 0;

    for &byte in &msg[..bits / 8] {
        crc ^= (byte as u32) << 16;

        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc & 0xFFFFFF
}

/// Check CRC validity of a Mode S frame.
///
/// Only DF11 (56 bits) and DF17/18 (112 bits) carry a plain parity field we
/// can verify without knowing the interrogator, everything else is refused.
pub fn check_crc(msg: &[u8]) -> Result<(), ParseError> {
    if msg.is_empty() {
        return Err(ParseError::InvalidLength(0));
    }
    let expected = match get_df(msg) {
        11 => 7,
        17 | 18 => 14,
        df => return Err(ParseError::UnsupportedMessage(format!("DF{}", df))),
    };
    if msg.len() != expected {
        return Err(ParseError::InvalidLength(msg.len()));
    }

    if compute_crc24(msg, msg.len() * 8) == 0 {
        Ok(())
    } else {
        Err(ParseError::CrcError)
    }
}

/// Extract ICAO address from frame (bytes 1-3)
pub fn get_icao(msg: &[u8]) -> u32 {
    ((msg[1] as u32) << 16) | ((msg[2] as u32) << 8) | (msg[3] as u32)
}

/// Extract downlink format from frame
pub fn get_df(msg: &[u8]) -> u8 {
    (msg[0] >> 3) & 0x1F
}
