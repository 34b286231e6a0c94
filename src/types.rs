//! Types for RFID operations

use std::fmt;
use thiserror::Error;

/// Longest EPC the module reports
pub const MAX_EPC_LEN: usize = 32;

/// Errors that can occur during RFID operations
#[derive(Debug, Error)]
pub enum UhfError {
    /// Transport layer error (UART, serial, etc.)
    #[error("Transport error: {0}")]
    Transport(String),
    /// Invalid parameter passed to a function
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// A well-formed reply whose contents could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// No reply byte arrived within the timeout
    #[error("No response to opcode 0x{opcode:02X} within {timeout_ms} ms")]
    Timeout { opcode: u8, timeout_ms: u32 },
    /// The reply started but did not complete within the timeout
    #[error("Incomplete response to opcode 0x{opcode:02X}: {received} bytes received")]
    Incomplete { opcode: u8, received: usize },
    /// CRC mismatch
    #[error("Corrupt frame: computed CRC 0x{computed:04X}, received 0x{received:04X}")]
    Corrupt { computed: u16, received: u16 },
    /// The reply belongs to a different command, usually leftover stream traffic
    #[error("Expected response to opcode 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedOpcode { expected: u8, actual: u8 },
    /// The module answered with a non-zero status word
    #[error("Opcode 0x{opcode:02X} rejected by device with status 0x{status:04X}")]
    DeviceRejected { opcode: u8, status: u16 },
    /// Tag report fields inconsistent with the declared lengths
    #[error("Tag report parse error: {0}")]
    ParseError(String),
    /// Setting not available on the connected module
    #[error("{setting} is not supported on {module:?}")]
    ConfigurationUnsupported { setting: &'static str, module: Module },
}

/// Module hardware variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Module {
    /// Nano M6E; tag encoding is set directly
    #[default]
    M6eNano,
    /// M7E Hecto; link timing is chosen through predefined RF modes
    M7eHecto,
}

/// An Electronic Product Code as read from a tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epc(Vec<u8>);

impl Epc {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse an EPC from a hex string such as `"E20000172209012319100123"`
    pub fn from_hex(hex: &str) -> Result<Self, UhfError> {
        let hex = hex.trim();
        if hex.is_empty() || !hex.is_ascii() || hex.len() % 2 != 0 {
            return Err(UhfError::InvalidParameter(format!(
                "EPC must be an even, non-zero number of hex digits: {:?}",
                hex
            )));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| UhfError::InvalidParameter(format!("Invalid EPC hex {:?}: {}", hex, e)))?;
        if bytes.len() > MAX_EPC_LEN {
            return Err(UhfError::InvalidParameter(format!(
                "EPC of {} bytes exceeds maximum of {} bytes",
                bytes.len(),
                MAX_EPC_LEN
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Epc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bytes_to_hex(&self.0))
    }
}

impl From<&[u8]> for Epc {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// One tag report decoded from the continuous-read stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Number of tag records in the frame
    pub tag_count: u8,
    /// How often the module saw this tag within the reporting cycle
    pub read_count: u8,
    /// Signal strength in dBm
    pub rssi: i8,
    /// TX port in the high nibble, RX port in the low nibble
    pub antenna: u8,
    /// Carrier frequency in kHz
    pub frequency_khz: u32,
    /// Milliseconds since the last keep-alive
    pub timestamp_ms: u32,
    pub phase: u16,
    pub protocol: u8,
    /// Embedded memory bank data, empty unless a bank read was requested
    pub data: Vec<u8>,
    pub pc: u16,
    pub epc: Epc,
    pub epc_crc: u16,
}

/// Firmware and hardware identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub bootloader: [u8; 4],
    pub hardware: [u8; 4],
    pub firmware_date: [u8; 4],
    pub firmware: [u8; 4],
    /// Bitmask of supported tag protocols
    pub protocols: u32,
}

impl VersionInfo {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, UhfError> {
        if data.len() < 20 {
            return Err(UhfError::InvalidResponse(format!(
                "Version response too short: {} bytes",
                data.len()
            )));
        }
        let quad = |at: usize| [data[at], data[at + 1], data[at + 2], data[at + 3]];
        Ok(Self {
            bootloader: quad(0),
            hardware: quad(4),
            firmware_date: quad(8),
            firmware: quad(12),
            protocols: u32::from_be_bytes(quad(16)),
        })
    }

    /// Firmware version as `"01.0B.02.00"`
    pub fn firmware_string(&self) -> String {
        self.firmware
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Regulatory region; selects the module's frequency plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Region {
    NorthAmerica = 0x01,
    India = 0x04,
    Japan = 0x05,
    China = 0x06,
    Europe = 0x08,
    Korea = 0x09,
    Australia = 0x0B,
    NewZealand = 0x0C,
    NorthAmerica2 = 0x0D,
    NorthAmerica3 = 0x0E,
    Open = 0xFF,
}

impl TryFrom<u8> for Region {
    type Error = UhfError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Region::NorthAmerica),
            0x04 => Ok(Region::India),
            0x05 => Ok(Region::Japan),
            0x06 => Ok(Region::China),
            0x08 => Ok(Region::Europe),
            0x09 => Ok(Region::Korea),
            0x0B => Ok(Region::Australia),
            0x0C => Ok(Region::NewZealand),
            0x0D => Ok(Region::NorthAmerica2),
            0x0E => Ok(Region::NorthAmerica3),
            0xFF => Ok(Region::Open),
            _ => Err(UhfError::InvalidParameter(format!(
                "Unknown region code: 0x{:02X}",
                value
            ))),
        }
    }
}

/// Gen2 memory banks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryBank {
    /// Kill and access passwords
    Reserved = 0x00,
    Epc = 0x01,
    Tid = 0x02,
    User = 0x03,
}

/// Module power saving level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    Full = 0,
    MinimalSave = 1,
    MediumSave = 2,
    /// Only accepts 9600 baud
    MaximumSave = 3,
    /// M7E only; the M6E falls back to `MediumSave`
    Sleep = 4,
}

/// Air protocol selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TagProtocol {
    None = 0x00,
    Iso180006b = 0x03,
    Gen2 = 0x05,
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
