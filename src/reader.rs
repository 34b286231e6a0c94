use log::{debug, error, warn};

use crate::framer::Framer;
use crate::protocol::{Response, encode_command, opcode};
use crate::transport::{Clock, RfidTransport, SystemClock};
use crate::types::{
    MemoryBank, Module, PowerMode, Region, TagProtocol, UhfError, VersionInfo, bytes_to_hex,
};

/// Default time to wait for a reply, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 2000;

/// Pause after a command that expects no reply before draining starts
const NO_REPLY_SETTLE_MS: u32 = 50;
/// How long to keep discarding input after a command that expects no reply
const NO_REPLY_DRAIN_MS: u64 = 250;
const DRAIN_POLL_MS: u32 = 5;

/// Read power ceiling in centi-dBm (27.00 dBm)
const MAX_READ_POWER: i16 = 2700;

// Reader optional parameter keys
const OPTION_UNIQUE_BY_DATA: u8 = 0x08;
const OPTION_READ_FILTER: u8 = 0x0C;

pub(crate) fn transport_error<E: std::fmt::Debug>(e: E) -> UhfError {
    UhfError::Transport(format!("{:?}", e))
}

/// Driver for a ThingMagic Nano (M6E) or M7E UHF RFID module
pub struct NanoRfid<T: RfidTransport, C: Clock = SystemClock> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) module: Module,
    pub(crate) framer: Framer,
    pub(crate) streaming: bool,
}

impl<T: RfidTransport> NanoRfid<T, SystemClock> {
    /// Create a new RFID reader instance with the given transport
    pub fn new(transport: T, module: Module) -> Self {
        Self::with_clock(transport, module, SystemClock::default())
    }
}

impl<T: RfidTransport, C: Clock> NanoRfid<T, C> {
    /// Create a reader that takes its time from `clock`
    pub fn with_clock(transport: T, module: Module, clock: C) -> Self {
        Self {
            transport,
            clock,
            module,
            framer: Framer::new(),
            streaming: false,
        }
    }

    pub fn module(&self) -> Module {
        self.module
    }

    /// Whether a continuous read is running
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Access the transport, e.g. to reopen it at a new baud rate
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send a command frame.
    ///
    /// With `expect_response` the reply is awaited, validated and returned.
    /// Without it, input is drained and discarded for a short while and
    /// `None` is returned. Any unread input, including streamed tag reports,
    /// is discarded before the command is written.
    pub fn send(
        &mut self,
        opcode: u8,
        payload: &[u8],
        timeout_ms: u32,
        expect_response: bool,
    ) -> Result<Option<Response>, UhfError> {
        if expect_response {
            self.send_command(opcode, payload, timeout_ms).map(Some)
        } else {
            self.send_no_reply(opcode, payload).map(|_| None)
        }
    }

    /// Send a command and wait up to `timeout_ms` for its reply
    pub fn send_command(
        &mut self,
        opcode: u8,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<Response, UhfError> {
        self.transmit(opcode, payload)?;
        let response = self.await_response(opcode, timeout_ms)?;

        if response.opcode != opcode {
            warn!(
                "Response opcode 0x{:02X} does not match request 0x{:02X}",
                response.opcode, opcode
            );
            return Err(UhfError::UnexpectedOpcode {
                expected: opcode,
                actual: response.opcode,
            });
        }

        if !response.is_ok() {
            debug!(
                "Opcode 0x{:02X} failed with status 0x{:04X}",
                opcode, response.status
            );
            return Err(UhfError::DeviceRejected {
                opcode,
                status: response.status,
            });
        }

        Ok(response)
    }

    /// Send a command whose reply is not wanted, then drain the input
    pub fn send_no_reply(&mut self, opcode: u8, payload: &[u8]) -> Result<(), UhfError> {
        self.transmit(opcode, payload)?;
        self.drain_input()
    }

    fn transmit(&mut self, opcode: u8, payload: &[u8]) -> Result<(), UhfError> {
        let frame = encode_command(opcode, payload)?;

        if self.streaming && opcode != opcode::MULTI_PROTOCOL_TAG_OP {
            warn!(
                "Sending opcode 0x{:02X} during a continuous read; unread tag reports are lost",
                opcode
            );
        }

        self.transport.clear_input().map_err(transport_error)?;
        self.framer.reset();

        debug!("Sending command: {:02X?}", frame);
        let written = self.transport.write(&frame).map_err(transport_error)?;
        if written != frame.len() {
            return Err(UhfError::Transport(format!(
                "Short write: {} of {} bytes",
                written,
                frame.len()
            )));
        }
        Ok(())
    }

    fn await_response(&mut self, opcode: u8, timeout_ms: u32) -> Result<Response, UhfError> {
        let start = self.clock.now_ms();
        let mut received = 0usize;

        loop {
            let available = match self.transport.bytes_available() {
                Ok(n) => n,
                Err(e) => {
                    error!("Read error: {:?}", e);
                    return Err(transport_error(e));
                }
            };

            for _ in 0..available {
                let Some(byte) = self.transport.read_byte().map_err(transport_error)? else {
                    break;
                };
                received += 1;

                if let Some(frame) = self.framer.feed(byte) {
                    debug!("Received {} bytes: {:02X?}", frame.len(), frame);
                    return Response::from_frame(frame);
                }
            }

            if self.clock.elapsed_since(start) >= timeout_ms as u64 {
                self.framer.reset();
                return Err(if received == 0 {
                    UhfError::Timeout { opcode, timeout_ms }
                } else {
                    UhfError::Incomplete { opcode, received }
                });
            }
            self.clock.delay_ms(1);
        }
    }

    fn drain_input(&mut self) -> Result<(), UhfError> {
        self.clock.delay_ms(NO_REPLY_SETTLE_MS);
        let start = self.clock.now_ms();
        while self.clock.elapsed_since(start) < NO_REPLY_DRAIN_MS {
            self.transport.clear_input().map_err(transport_error)?;
            self.clock.delay_ms(DRAIN_POLL_MS);
        }
        self.framer.reset();
        Ok(())
    }

    /// Get bootloader, hardware and firmware versions
    pub fn version(&mut self) -> Result<VersionInfo, UhfError> {
        let response = self.send_command(opcode::VERSION, &[], DEFAULT_TIMEOUT_MS)?;
        VersionInfo::parse(&response.data)
    }

    /// Set the serial baud rate.
    ///
    /// The command is sent at the current rate. Afterwards the transport must be
    /// reopened at `baud_rate` before further communication is possible.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), UhfError> {
        self.send_command(opcode::SET_BAUD_RATE, &baud_rate.to_be_bytes(), DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    /// Set operating region
    ///
    /// The region must match local regulations. The M6E has no plain North
    /// America plan, `Region::NorthAmerica` selects `NorthAmerica2` there.
    pub fn set_region(&mut self, region: Region) -> Result<(), UhfError> {
        let region = match (region, self.module) {
            (Region::NorthAmerica, Module::M6eNano) => Region::NorthAmerica2,
            (region, _) => region,
        };
        self.send_command(opcode::SET_REGION, &[region as u8], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    /// Set read power in centi-dBm (1005 = 10.05 dBm), limited to 27.00 dBm
    pub fn set_read_power(&mut self, centi_dbm: i16) -> Result<(), UhfError> {
        let power = if centi_dbm > MAX_READ_POWER {
            warn!(
                "Read power {} limited to {} centi-dBm",
                centi_dbm, MAX_READ_POWER
            );
            MAX_READ_POWER
        } else {
            centi_dbm
        };
        self.send_command(opcode::SET_READ_TX_POWER, &power.to_be_bytes(), DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    /// Get read power in centi-dBm
    pub fn read_power(&mut self) -> Result<i16, UhfError> {
        let response = self.send_command(opcode::GET_READ_TX_POWER, &[0x00], DEFAULT_TIMEOUT_MS)?;
        Self::parse_power(&response)
    }

    /// Set write power in centi-dBm
    pub fn set_write_power(&mut self, centi_dbm: i16) -> Result<(), UhfError> {
        self.send_command(
            opcode::SET_WRITE_TX_POWER,
            &centi_dbm.to_be_bytes(),
            DEFAULT_TIMEOUT_MS,
        )?;
        Ok(())
    }

    /// Get write power in centi-dBm
    pub fn write_power(&mut self) -> Result<i16, UhfError> {
        let response = self.send_command(opcode::GET_WRITE_TX_POWER, &[0x00], DEFAULT_TIMEOUT_MS)?;
        Self::parse_power(&response)
    }

    fn parse_power(response: &Response) -> Result<i16, UhfError> {
        // [option echo][power_hi][power_lo]
        match response.data.as_slice() {
            [_, hi, lo, ..] => Ok(i16::from_be_bytes([*hi, *lo])),
            data => Err(UhfError::InvalidResponse(format!(
                "Power response too short: {}",
                bytes_to_hex(data)
            ))),
        }
    }

    /// Select TX and RX antenna ports
    pub fn set_antenna_port(&mut self, tx: u8, rx: u8) -> Result<(), UhfError> {
        self.send_command(opcode::SET_ANTENNA_PORT, &[tx, rx], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    /// Use the logical antenna list with port 1 for both TX and RX
    pub fn set_antenna_search_list(&mut self) -> Result<(), UhfError> {
        self.send_command(opcode::SET_ANTENNA_PORT, &[0x02, 0x01, 0x01], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    pub fn set_tag_protocol(&mut self, protocol: TagProtocol) -> Result<(), UhfError> {
        self.send_command(opcode::SET_TAG_PROTOCOL, &[0x00, protocol as u8], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    /// Set a key/value reader optional parameter
    pub fn set_reader_option(&mut self, key: u8, value: u8) -> Result<(), UhfError> {
        self.send_command(
            opcode::SET_READER_OPTIONAL_PARAMS,
            &[0x01, key, value],
            DEFAULT_TIMEOUT_MS,
        )?;
        Ok(())
    }

    /// Read back one reader option
    pub fn reader_option(&mut self, key: u8) -> Result<u8, UhfError> {
        let response = self.send_command(
            opcode::GET_READER_OPTIONAL_PARAMS,
            &[0x01, key],
            DEFAULT_TIMEOUT_MS,
        )?;
        match response.data.as_slice() {
            [0x01, echoed, value, ..] if *echoed == key => Ok(*value),
            data => Err(UhfError::InvalidResponse(format!(
                "Reader option 0x{:02X} reply echoes {}",
                key,
                bytes_to_hex(data)
            ))),
        }
    }

    /// Enable or disable the module's duplicate read filter.
    ///
    /// With the filter on, a tag is reported only once per read command;
    /// continuous inventory wants it off.
    pub fn set_read_filter(&mut self, enabled: bool) -> Result<(), UhfError> {
        self.set_reader_option(OPTION_READ_FILTER, enabled as u8)
    }

    /// Treat tags with equal EPC but different embedded bank data as distinct
    pub fn set_unique_by_data(&mut self, enabled: bool) -> Result<(), UhfError> {
        self.set_reader_option(OPTION_UNIQUE_BY_DATA, enabled as u8)
    }

    /// Set power saving mode. `Sleep` falls back to `MediumSave` on the M6E.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), UhfError> {
        let mode = match (mode, self.module) {
            (PowerMode::Sleep, Module::M6eNano) => PowerMode::MediumSave,
            (mode, _) => mode,
        };
        self.send_command(opcode::SET_POWER_MODE, &[mode as u8], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    pub fn power_mode(&mut self) -> Result<PowerMode, UhfError> {
        let response = self.send_command(opcode::GET_POWER_MODE, &[], DEFAULT_TIMEOUT_MS)?;
        match response.data.first() {
            Some(0) => Ok(PowerMode::Full),
            Some(1) => Ok(PowerMode::MinimalSave),
            Some(2) => Ok(PowerMode::MediumSave),
            Some(3) => Ok(PowerMode::MaximumSave),
            Some(4) => Ok(PowerMode::Sleep),
            _ => Err(UhfError::InvalidResponse(format!(
                "Unknown power mode: {}",
                bytes_to_hex(&response.data)
            ))),
        }
    }

    /// Module temperature in degrees Celsius
    pub fn temperature(&mut self) -> Result<i8, UhfError> {
        let response = self.send_command(opcode::GET_TEMPERATURE, &[], DEFAULT_TIMEOUT_MS)?;
        response
            .data
            .first()
            .map(|&t| t as i8)
            .ok_or_else(|| UhfError::InvalidResponse("Empty temperature response".into()))
    }

    /// Read data from a tag's memory bank
    ///
    /// # Arguments
    /// * `mem_bank` - Memory bank to read from
    /// * `word_address` - Starting word address (1 word = 2 bytes)
    /// * `word_count` - Number of words to read, 0 reads the whole bank
    /// * `timeout_ms` - Time the module may spend on the tag operation
    ///
    /// # Returns
    /// The raw bytes read from the tag memory
    pub fn read_tag_data(
        &mut self,
        mem_bank: MemoryBank,
        word_address: u32,
        word_count: u8,
        timeout_ms: u16,
    ) -> Result<Vec<u8>, UhfError> {
        let mut params = Vec::with_capacity(8);
        params.extend_from_slice(&timeout_ms.to_be_bytes());
        params.push(mem_bank as u8);
        params.extend_from_slice(&word_address.to_be_bytes());
        params.push(word_count);

        // The module spends up to `timeout_ms` on the tag before it answers
        let reply_timeout = (timeout_ms as u32).saturating_mul(2);
        let response = self.send_command(opcode::READ_TAG_DATA, &params, reply_timeout)?;
        Ok(response.data)
    }

    /// Clear the module's tag ID buffer
    pub fn clear_tag_id_buffer(&mut self) -> Result<(), UhfError> {
        self.send_command(opcode::CLEAR_TAG_ID_BUFFER, &[], DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }
}
