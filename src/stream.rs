//! Continuous-read streaming: the start/stop requests and classification of
//! the frames the module pushes while streaming.

use log::{debug, info};

use crate::gen2::GEN2_PROTOCOL_ID;
use crate::protocol::{Response, opcode};
use crate::reader::{NanoRfid, transport_error};
use crate::transport::{Clock, RfidTransport};
use crate::types::{Epc, MAX_EPC_LEN, MemoryBank, TagRecord, UhfError};

/// Status word of a keep-alive frame
pub const STATUS_KEEP_ALIVE: u16 = 0x0400;
/// Status word the module sends when it throttles for temperature
pub const STATUS_THERMAL_THROTTLE: u16 = 0x0504;

/// Payload of the multi-protocol request that ends streaming
pub const STOP_CONTINUOUS: [u8; 3] = [0x00, 0x00, 0x02];

// Search flags
const SEARCH_CONFIGURED_LIST: u16 = 0x0003;
const SEARCH_EMBEDDED_COMMAND: u16 = 0x0004;
const SEARCH_TAG_STREAMING: u16 = 0x0008;
const SEARCH_LARGE_TAG_POPULATION: u16 = 0x0010;
const SEARCH_STATS_REPORT_STREAMING: u16 = 0x0100;

/// Multi-protocol option selecting continuous operation
const MULTI_PROTOCOL_CONTINUOUS: u8 = 0x01;
/// Read option requesting per-tag metadata
const READ_OPTION_METADATA: u8 = 0x10;

// Metadata flags
const METADATA_REPORTED: u16 = 0x01FF;
const METADATA_GPIO: u16 = 0x0100;
const METADATA_GEN2_EXTRAS: u16 = 0x0E00;

/// Statistics request: temperature
const STATS_TEMPERATURE: [u8; 2] = [0x01, 0x00];

/// Stats frame field values identifying a temperature update
const STATS_UPDATE: u8 = 0x02;
const STATS_TEMPERATURE_FLAG: u8 = 0x82;

const TAG_HEADER_LEN: usize = 21;

/// Longest embedded bank read the module answers correctly, in words
pub const MAX_EMBEDDED_WORDS: u8 = 32;
/// Time the module may spend on each embedded bank read
const EMBEDDED_READ_TIMEOUT_MS: u16 = 2000;

/// Memory bank read the module performs on every tag it inventories. The
/// data comes back in [`TagRecord::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankRead {
    pub bank: MemoryBank,
    /// First word to read
    pub word_address: u32,
    /// Words to read; 0 reads the whole bank, except on the user bank where
    /// it reads the maximum. Capped at [`MAX_EMBEDDED_WORDS`].
    pub word_count: u8,
}

impl BankRead {
    pub fn new(bank: MemoryBank, word_address: u32, word_count: u8) -> Self {
        Self {
            bank,
            word_address,
            word_count,
        }
    }

    /// Word count actually requested. User memory is usually larger than an
    /// embedded read can return, so "whole bank" is not allowed there.
    pub fn effective_word_count(&self) -> u8 {
        match (self.bank, self.word_count) {
            (MemoryBank::User, 0) => MAX_EMBEDDED_WORDS,
            (_, count) => count.min(MAX_EMBEDDED_WORDS),
        }
    }

    /// `[count][len][opcode][timeout][option][bank][address][words]`
    fn embedded_command(&self) -> Vec<u8> {
        let mut read = Vec::with_capacity(9);
        read.extend_from_slice(&EMBEDDED_READ_TIMEOUT_MS.to_be_bytes());
        read.push(0x00); // option
        read.push(self.bank as u8);
        read.extend_from_slice(&self.word_address.to_be_bytes());
        read.push(self.effective_word_count());

        let mut command = Vec::with_capacity(3 + read.len());
        command.push(0x01); // one embedded command
        command.push(read.len() as u8);
        command.push(opcode::READ_TAG_DATA);
        command.extend_from_slice(&read);
        command
    }
}

/// Parameters of a continuous read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousRead {
    /// Length of one module-internal read cycle
    pub cycle_timeout_ms: u16,
    /// Ask the module to stream its temperature alongside tag reports
    pub report_temperature: bool,
    /// Read a memory bank of every tag seen
    pub bank_read: Option<BankRead>,
}

impl Default for ContinuousRead {
    fn default() -> Self {
        Self {
            cycle_timeout_ms: 1000,
            report_temperature: false,
            bank_read: None,
        }
    }
}

impl ContinuousRead {
    fn search_flags(&self) -> u16 {
        let mut flags =
            SEARCH_CONFIGURED_LIST | SEARCH_TAG_STREAMING | SEARCH_LARGE_TAG_POPULATION;
        if self.bank_read.is_some() {
            flags |= SEARCH_EMBEDDED_COMMAND;
        }
        if self.report_temperature {
            flags |= SEARCH_STATS_REPORT_STREAMING;
        }
        flags
    }

    /// Payload of the multi-protocol request that starts streaming
    pub fn start_payload(&self) -> Vec<u8> {
        // Embedded read request, minus its sub-opcode
        let mut read = Vec::with_capacity(9);
        read.push(READ_OPTION_METADATA);
        read.extend_from_slice(&self.search_flags().to_be_bytes());
        read.extend_from_slice(&self.cycle_timeout_ms.to_be_bytes());
        read.extend_from_slice(&METADATA_REPORTED.to_be_bytes());
        if self.report_temperature {
            read.extend_from_slice(&STATS_TEMPERATURE);
        }
        if let Some(bank_read) = &self.bank_read {
            read.extend_from_slice(&bank_read.embedded_command());
        }

        let mut payload = Vec::with_capacity(9 + read.len());
        payload.extend_from_slice(&0u16.to_be_bytes()); // timeout
        payload.push(MULTI_PROTOCOL_CONTINUOUS);
        payload.push(opcode::READ_TAG_ID_MULTIPLE);
        payload.extend_from_slice(&0u16.to_be_bytes()); // search flags
        payload.push(GEN2_PROTOCOL_ID);
        payload.push(read.len() as u8);
        payload.push(opcode::READ_TAG_ID_MULTIPLE);
        payload.extend_from_slice(&read);
        payload
    }
}

/// A frame received while streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Tag(TagRecord),
    KeepAlive,
    ThermalThrottle,
    /// Module temperature in degrees Celsius
    Temperature(i8),
    /// Empty frame with a status word that has no known meaning
    Status(u16),
    /// Non-tag stream frame whose contents are not interpreted
    Unclassified { len: usize, status: u16 },
    /// Reply to some other command
    Foreign { opcode: u8, status: u16 },
}

impl StreamFrame {
    /// Validate and classify a complete frame
    pub fn decode(frame: &[u8]) -> Result<Self, UhfError> {
        let response = Response::from_frame(frame)?;
        if response.opcode != opcode::READ_TAG_ID_MULTIPLE {
            return Ok(StreamFrame::Foreign {
                opcode: response.opcode,
                status: response.status,
            });
        }

        let status = response.status;
        let data = response.data;
        let frame = match data.len() {
            0 => match status {
                STATUS_KEEP_ALIVE => StreamFrame::KeepAlive,
                STATUS_THERMAL_THROTTLE => StreamFrame::ThermalThrottle,
                status => StreamFrame::Status(status),
            },
            0x0A if data[3] == STATS_UPDATE
                && data[6] == STATS_TEMPERATURE_FLAG
                && data[8] == 0x01 =>
            {
                StreamFrame::Temperature(data[9] as i8)
            }
            0x0E if status == STATUS_KEEP_ALIVE => StreamFrame::KeepAlive,
            len @ (0x08 | 0x0A | 0x0E) => StreamFrame::Unclassified { len, status },
            _ if status != 0 => StreamFrame::Status(status),
            _ => StreamFrame::Tag(parse_tag_record(&data)?),
        };
        Ok(frame)
    }
}

fn field(data: &[u8], at: usize, len: usize) -> Result<&[u8], UhfError> {
    data.get(at..at + len).ok_or_else(|| {
        UhfError::ParseError(format!(
            "Tag report truncated: {} bytes at offset {} requested, {} available",
            len,
            at,
            data.len()
        ))
    })
}

fn be_u16(data: &[u8], at: usize) -> Result<u16, UhfError> {
    let b = field(data, at, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

/// Parse a tag report from the bytes following the status word.
///
/// ```text
/// 0     read option
/// 1-2   search flags
/// 3-4   metadata flags
/// 5     tag count
/// 6     read count
/// 7     RSSI
/// 8     antenna
/// 9-11  frequency
/// 12-15 timestamp
/// 16-17 phase
/// 18    protocol
/// 19-20 embedded data length in bits
/// 21..  embedded data, GPIO, Gen2 extras, EPC length in bits, PC, EPC, EPC CRC
/// ```
fn parse_tag_record(data: &[u8]) -> Result<TagRecord, UhfError> {
    let header = field(data, 0, TAG_HEADER_LEN)?;
    let metadata = u16::from_be_bytes([header[3], header[4]]);
    let data_bits = u16::from_be_bytes([header[19], header[20]]) as usize;
    let data_len = data_bits.div_ceil(8);
    let embedded = field(data, TAG_HEADER_LEN, data_len)?;

    let mut at = TAG_HEADER_LEN + data_len;
    if metadata & METADATA_GPIO != 0 {
        at += 1;
    }
    at += (metadata & METADATA_GEN2_EXTRAS).count_ones() as usize;

    // The EPC length covers PC, EPC and EPC CRC
    let epc_bits = be_u16(data, at)? as usize;
    let epc_len = (epc_bits / 8).saturating_sub(4);
    if epc_len == 0 || epc_len > MAX_EPC_LEN {
        return Err(UhfError::ParseError(format!(
            "EPC length of {} bits out of range",
            epc_bits
        )));
    }
    let pc = be_u16(data, at + 2)?;
    let epc = field(data, at + 4, epc_len)?;
    let epc_crc = be_u16(data, at + 4 + epc_len)?;

    Ok(TagRecord {
        tag_count: header[5],
        read_count: header[6],
        rssi: header[7] as i8,
        antenna: header[8],
        frequency_khz: u32::from_be_bytes([0, header[9], header[10], header[11]]),
        timestamp_ms: u32::from_be_bytes([header[12], header[13], header[14], header[15]]),
        phase: u16::from_be_bytes([header[16], header[17]]),
        protocol: header[18],
        data: embedded.to_vec(),
        pc,
        epc: Epc::from(epc),
        epc_crc,
    })
}

impl<T: RfidTransport, C: Clock> NanoRfid<T, C> {
    /// Start streaming tag reports. The module does not reply in a usable
    /// way, so the input is drained instead.
    pub fn start_continuous(&mut self, read: &ContinuousRead) -> Result<(), UhfError> {
        self.send_no_reply(opcode::MULTI_PROTOCOL_TAG_OP, &read.start_payload())?;
        self.streaming = true;
        info!(
            "Continuous read started (cycle {} ms, temperature {})",
            read.cycle_timeout_ms, read.report_temperature
        );
        Ok(())
    }

    /// Stop streaming. Reports still in flight are discarded.
    pub fn stop_continuous(&mut self) -> Result<(), UhfError> {
        self.streaming = false;
        self.send_no_reply(opcode::MULTI_PROTOCOL_TAG_OP, &STOP_CONTINUOUS)?;
        info!("Continuous read stopped");
        Ok(())
    }

    /// Consume available input until one frame completes.
    ///
    /// Returns `Ok(None)` once the input is exhausted. Never waits for bytes
    /// that have not arrived yet. A frame that fails validation or parsing is
    /// returned as its error; later frames are unaffected.
    pub fn poll_stream(&mut self) -> Result<Option<StreamFrame>, UhfError> {
        let available = self.transport.bytes_available().map_err(transport_error)?;
        for _ in 0..available {
            let Some(byte) = self.transport.read_byte().map_err(transport_error)? else {
                break;
            };
            if let Some(frame) = self.framer.feed(byte) {
                debug!("Stream frame {} bytes: {:02X?}", frame.len(), frame);
                return StreamFrame::decode(frame).map(Some);
            }
        }
        Ok(None)
    }
}
