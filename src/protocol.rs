//! Wire format of the Nano serial protocol.
//!
//! ```text
//! command:  [FF][len][opcode][payload .. ][crc_hi][crc_lo]
//! response: [FF][len][opcode][status_hi][status_lo][data .. ][crc_hi][crc_lo]
//! ```
//!
//! `len` counts payload (or data) bytes only. The CRC covers `len` through the
//! last payload byte, status word included.

use crate::crc::crc16;
use crate::types::UhfError;

pub const SYNC: u8 = 0xFF;

/// Sync, length, opcode and CRC
pub const COMMAND_FRAME_OVERHEAD: usize = 5;
/// Sync, length, opcode, status word and CRC
pub const STATUS_FRAME_OVERHEAD: usize = 7;

/// Largest payload the length byte can describe
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Status word reported by a successful command
pub const STATUS_OK: u16 = 0x0000;

/// Opcodes understood by the module.
pub mod opcode {
    pub const VERSION: u8 = 0x03;
    pub const SET_BAUD_RATE: u8 = 0x06;
    pub const READ_TAG_ID_MULTIPLE: u8 = 0x22;
    pub const READ_TAG_DATA: u8 = 0x28;
    pub const CLEAR_TAG_ID_BUFFER: u8 = 0x2A;
    pub const MULTI_PROTOCOL_TAG_OP: u8 = 0x2F;
    pub const GET_READ_TX_POWER: u8 = 0x62;
    pub const GET_WRITE_TX_POWER: u8 = 0x64;
    pub const GET_POWER_MODE: u8 = 0x68;
    pub const GET_READER_OPTIONAL_PARAMS: u8 = 0x6A;
    pub const GET_PROTOCOL_PARAM: u8 = 0x6B;
    pub const GET_TEMPERATURE: u8 = 0x72;
    pub const SET_ANTENNA_PORT: u8 = 0x91;
    pub const SET_READ_TX_POWER: u8 = 0x92;
    pub const SET_TAG_PROTOCOL: u8 = 0x93;
    pub const SET_WRITE_TX_POWER: u8 = 0x94;
    pub const SET_REGION: u8 = 0x97;
    pub const SET_POWER_MODE: u8 = 0x98;
    pub const SET_READER_OPTIONAL_PARAMS: u8 = 0x9A;
    pub const SET_PROTOCOL_PARAM: u8 = 0x9B;
}

/// Build a command frame ready to be written to the module
pub fn encode_command(opcode: u8, payload: &[u8]) -> Result<Vec<u8>, UhfError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(UhfError::InvalidParameter(format!(
            "Payload of {} bytes exceeds maximum of {} bytes",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + COMMAND_FRAME_OVERHEAD);
    frame.push(SYNC);
    frame.push(payload.len() as u8);
    frame.push(opcode);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Build a frame the way the module sends it, with a status word ahead of the data.
///
/// `data` longer than 255 bytes is truncated.
#[cfg(test)]
pub(crate) fn encode_response(opcode: u8, status: u16, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(MAX_PAYLOAD_LEN)];
    let mut frame = Vec::with_capacity(data.len() + STATUS_FRAME_OVERHEAD);
    frame.push(SYNC);
    frame.push(data.len() as u8);
    frame.push(opcode);
    frame.extend_from_slice(&status.to_be_bytes());
    frame.extend_from_slice(data);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Check the framing and CRC of a complete frame carrying a status word
pub fn validate_frame(frame: &[u8]) -> Result<(), UhfError> {
    if frame.len() < STATUS_FRAME_OVERHEAD || frame[0] != SYNC {
        return Err(UhfError::InvalidResponse(format!(
            "Malformed frame: {:02X?}",
            frame
        )));
    }

    let expected_len = frame[1] as usize + STATUS_FRAME_OVERHEAD;
    if frame.len() != expected_len {
        return Err(UhfError::InvalidResponse(format!(
            "Frame length {} does not match declared length {}",
            frame.len(),
            expected_len
        )));
    }

    let crc_at = frame.len() - 2;
    let computed = crc16(&frame[1..crc_at]);
    let received = u16::from_be_bytes([frame[crc_at], frame[crc_at + 1]]);
    if computed != received {
        return Err(UhfError::Corrupt { computed, received });
    }
    Ok(())
}

/// A validated frame received from the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: u8,
    pub status: u16,
    /// Bytes following the status word
    pub data: Vec<u8>,
}

impl Response {
    /// Validate `frame` and copy its contents out of the receive area
    pub fn from_frame(frame: &[u8]) -> Result<Self, UhfError> {
        validate_frame(frame)?;
        let data_end = frame.len() - 2;
        Ok(Self {
            opcode: frame[2],
            status: u16::from_be_bytes([frame[3], frame[4]]),
            data: frame[5..data_end].to_vec(),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_reader_option_command() {
        let frame =
            encode_command(opcode::SET_READER_OPTIONAL_PARAMS, &[0x01, 0x08, 0x00]).unwrap();
        assert_eq!(frame, [0xFF, 0x03, 0x9A, 0x01, 0x08, 0x00, 0xA7, 0x5D]);
    }

    #[test]
    fn test_encode_command_no_payload() {
        let frame = encode_command(opcode::VERSION, &[]).unwrap();
        assert_eq!(frame.len(), COMMAND_FRAME_OVERHEAD);
        assert_eq!(&frame[..3], &[0xFF, 0x00, 0x03]);
        assert_eq!(
            u16::from_be_bytes([frame[3], frame[4]]),
            crc16(&[0x00, 0x03])
        );
    }

    #[test]
    fn test_encode_command_payload_too_long() {
        let result = encode_command(opcode::READ_TAG_DATA, &[0u8; 256]);
        assert!(matches!(result, Err(UhfError::InvalidParameter(_))));
    }

    #[test]
    fn test_response_from_frame() {
        let frame = encode_response(opcode::GET_TEMPERATURE, STATUS_OK, &[0x1A]);
        assert_eq!(frame.len(), 1 + STATUS_FRAME_OVERHEAD);

        let response = Response::from_frame(&frame).unwrap();
        assert_eq!(response.opcode, opcode::GET_TEMPERATURE);
        assert!(response.is_ok());
        assert_eq!(response.data, vec![0x1A]);
    }

    #[test]
    fn test_response_status_word() {
        let frame = encode_response(opcode::SET_REGION, 0x0105, &[]);
        let response = Response::from_frame(&frame).unwrap();
        assert_eq!(response.status, 0x0105);
        assert!(!response.is_ok());
    }

    #[test]
    fn test_response_corrupt_crc() {
        let mut frame = encode_response(opcode::VERSION, STATUS_OK, &[0x01, 0x02]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            Response::from_frame(&frame),
            Err(UhfError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_response_length_mismatch() {
        let mut frame = encode_response(opcode::VERSION, STATUS_OK, &[0x01, 0x02]);
        frame.pop();
        assert!(matches!(
            Response::from_frame(&frame),
            Err(UhfError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_response_invalid_header() {
        let mut frame = encode_response(opcode::VERSION, STATUS_OK, &[]);
        frame[0] = 0xAA;
        assert!(matches!(
            Response::from_frame(&frame),
            Err(UhfError::InvalidResponse(_))
        ));
    }
}
