//! Serial port transport for desktop using serialport crate

use crate::transport::RfidTransport;
use std::io;
use std::time::Duration;

/// Blocking reads only happen for bytes already reported as available
const READ_TIMEOUT_MS: u64 = 10;

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` as 8N1 at `baud_rate`
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()?;
        port.clear(serialport::ClearBuffer::Input)?;

        Ok(Self { port })
    }

    /// Switch the local side to `baud_rate`, e.g. after the module accepted
    /// a baud rate change
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), serialport::Error> {
        self.port.set_baud_rate(baud_rate)?;
        self.port.clear(serialport::ClearBuffer::Input)
    }
}

impl RfidTransport for SerialTransport {
    type Error = io::Error;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::other)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut byte = [0u8; 1];
        match io::Read::read(&mut self.port, &mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        io::Write::write_all(&mut self.port, data)?;
        io::Write::flush(&mut self.port)?;
        Ok(data.len())
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}
