//! PLC command frame codec
//!
//! Builds and parses the ASCII register protocol spoken by the chamber
//! PLC. Frames are STX-prefixed ASCII with a two-character LRC trailer
//! and an ETX terminator:
//!
//! ```text
//! read:  0x02 '0' '1' '4' '6' '0' '2' <ADDR:6> <LRC:2> 0x03
//! write: 0x02 '0' '1' '4' '7' '0' '1' <ADDR:6> <VALUE:4 hex> <LRC:2> 0x03
//! ```
//!
//! Pure functions, no I/O.

use crate::error::{OxySrvError, Result};

/// Frame start byte
pub const STX: u8 = 0x02;
/// Frame terminator byte
pub const ETX: u8 = 0x03;

/// Register address length in ASCII characters
pub const ADDRESS_LEN: usize = 6;

// 7-byte command headers: STX, station "01", byte count '4', function
// code, then the sub-function pair.
const READ_HEADER: [u8; 7] = [STX, b'0', b'1', b'4', b'6', b'0', b'2'];
const WRITE_HEADER: [u8; 7] = [STX, b'0', b'1', b'4', b'7', b'0', b'1'];

/// Fixed signature every valid response starts with
const RESPONSE_SIGNATURE: [u8; 4] = [STX, b'0', b'1', b'4'];

/// Response header length before the sample payload begins
const RESPONSE_HEADER_LEN: usize = 6;
/// Trailing bytes after the payload: two LRC characters plus ETX
const RESPONSE_TRAILER_LEN: usize = 3;

/// Compute the LRC trailer for a frame prefix
///
/// Low byte of the sum of every byte seen so far, rendered as a
/// zero-padded two-character lowercase hex string. The PLC compares the
/// characters literally, so the case matters.
pub fn lrc(bytes: &[u8]) -> String {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    format!("{sum:02x}")
}

fn validate_address(address: &str) -> Result<()> {
    if address.len() != ADDRESS_LEN || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(OxySrvError::protocol(format!(
            "Invalid register address '{address}': expected {ADDRESS_LEN} ASCII characters"
        )));
    }
    Ok(())
}

/// Build a read-registers command for the given register address
pub fn encode_read_command(address: &str) -> Result<Vec<u8>> {
    validate_address(address)?;

    let mut frame = Vec::with_capacity(READ_HEADER.len() + ADDRESS_LEN + 3);
    frame.extend_from_slice(&READ_HEADER);
    frame.extend_from_slice(address.as_bytes());
    let check = lrc(&frame);
    frame.extend_from_slice(check.as_bytes());
    frame.push(ETX);
    Ok(frame)
}

/// Build a write-register command for the given address and 16-bit value
///
/// The value travels as a zero-padded four-character uppercase hex
/// string, big-endian.
pub fn encode_write_command(address: &str, value: u16) -> Result<Vec<u8>> {
    validate_address(address)?;

    let mut frame = Vec::with_capacity(WRITE_HEADER.len() + ADDRESS_LEN + 7);
    frame.extend_from_slice(&WRITE_HEADER);
    frame.extend_from_slice(address.as_bytes());
    frame.extend_from_slice(format!("{value:04X}").as_bytes());
    let check = lrc(&frame);
    frame.extend_from_slice(check.as_bytes());
    frame.push(ETX);
    Ok(frame)
}

/// Decode one response frame into raw sensor samples
///
/// A frame whose first four bytes do not match the expected signature
/// yields zero samples rather than an error; the caller's response
/// timeout handles the rest. The payload is a run of back-to-back
/// four-hex-digit groups between the header and the LRC/ETX trailer.
pub fn decode_response(frame: &[u8]) -> Vec<u16> {
    if frame.len() < RESPONSE_HEADER_LEN + RESPONSE_TRAILER_LEN {
        return Vec::new();
    }
    if frame[..RESPONSE_SIGNATURE.len()] != RESPONSE_SIGNATURE {
        return Vec::new();
    }

    let payload = &frame[RESPONSE_HEADER_LEN..frame.len() - RESPONSE_TRAILER_LEN];
    payload
        .chunks_exact(4)
        .map_while(|group| {
            std::str::from_utf8(group)
                .ok()
                .and_then(|s| u16::from_str_radix(s, 16).ok())
        })
        .collect()
}
