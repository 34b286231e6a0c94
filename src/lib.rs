//! Driver for ThingMagic Nano (M6E) and M7E UHF RFID modules, with control
//! over the Gen2 anti-collision parameters and multi-tag inventory scans.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use nano_rfid::{Epc, Module, NanoRfid, Region, Roster, ScanConfig, SerialTransport};
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 115200)?;
//! let mut rfid = NanoRfid::new(transport, Module::M6eNano);
//! rfid.set_region(Region::Europe)?;
//! rfid.set_read_power(2500)?;
//!
//! let mut roster = Roster::new();
//! roster.add("pallet-1", Epc::from_hex("E20000172209012319100123")?)?;
//! roster.add("pallet-2", Epc::from_hex("E20000172209012319100124")?)?;
//!
//! let report = rfid.scan(roster, &ScanConfig::default())?;
//! println!("{:?}: {:?}", report.outcome, report.present);
//! ```

mod crc;
mod framer;
mod gen2;
mod inventory;
mod protocol;
mod reader;
mod stream;
mod transport;
mod types;

#[cfg(test)]
mod sim;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use crc::crc16;
pub use framer::{Framer, MAX_FRAME_SIZE};
pub use gen2::{
    GEN2_PROTOCOL_ID, Gen2Config, LinkSetting, ProtocolParam, QAlgorithm, RfMode, Session,
    TagEncoding, Target, param,
};
pub use inventory::{
    Inventory, Roster, RosterEntry, ScanConfig, ScanOutcome, ScanProgress, ScanReport,
    ScanSession, SeenTag,
};
pub use protocol::{Response, encode_command, opcode, validate_frame};
pub use reader::{DEFAULT_TIMEOUT_MS, NanoRfid};
pub use stream::{
    BankRead, ContinuousRead, MAX_EMBEDDED_WORDS, STATUS_KEEP_ALIVE, STATUS_THERMAL_THROTTLE,
    STOP_CONTINUOUS, StreamFrame,
};
pub use transport::{Clock, RfidTransport, SystemClock};
pub use types::{
    Epc, MemoryBank, Module, PowerMode, Region, TagProtocol, TagRecord, UhfError, VersionInfo,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
