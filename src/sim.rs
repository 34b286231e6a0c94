//! Scripted transport and simulated clock for exercising the reader without hardware.
//!
//! Both share one millisecond counter. The clock only advances when the
//! reader delays, so timeouts and scan windows elapse instantly and
//! deterministically. Every write pops the next script from the queue and
//! schedules its bytes relative to the time of the write.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::protocol::{STATUS_OK, encode_response, opcode};
use crate::reader::NanoRfid;
use crate::transport::{Clock, RfidTransport};
use crate::types::Module;

/// Bytes to deliver, each chunk paired with its delay after the triggering write
pub type Script = Vec<(u64, Vec<u8>)>;

#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now.set(self.now.get() + ms as u64);
    }
}

pub struct ScriptedTransport {
    now: Rc<Cell<u64>>,
    scripts: VecDeque<Script>,
    pending: VecDeque<(u64, u8)>,
    /// Every frame written, in order
    pub written: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new(clock: &SimClock, scripts: Vec<Script>) -> Self {
        Self {
            now: clock.now.clone(),
            scripts: scripts.into(),
            pending: VecDeque::new(),
            written: Vec::new(),
        }
    }

    /// Deliver `bytes` `after_ms` from now, independent of any write
    pub fn push_input(&mut self, after_ms: u64, bytes: &[u8]) {
        let at = self.now.get() + after_ms;
        let mut pos = self.pending.partition_point(|&(t, _)| t <= at);
        for &byte in bytes {
            self.pending.insert(pos, (at, byte));
            pos += 1;
        }
    }

    fn arrived(&self) -> usize {
        let now = self.now.get();
        self.pending.iter().take_while(|&&(t, _)| t <= now).count()
    }
}

impl RfidTransport for ScriptedTransport {
    type Error = io::Error;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        Ok(self.arrived())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        match self.pending.front() {
            Some(&(t, byte)) if t <= self.now.get() => {
                self.pending.pop_front();
                Ok(Some(byte))
            }
            _ => Ok(None),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.written.push(data.to_vec());
        if let Some(script) = self.scripts.pop_front() {
            for (after_ms, bytes) in script {
                self.push_input(after_ms, &bytes);
            }
        }
        Ok(data.len())
    }
}

/// Reader on a scripted transport with a clock starting at zero
pub fn reader(module: Module, scripts: Vec<Script>) -> NanoRfid<ScriptedTransport, SimClock> {
    let clock = SimClock::default();
    let transport = ScriptedTransport::new(&clock, scripts);
    NanoRfid::with_clock(transport, module, clock)
}

/// Script answering the next write with `frame` one millisecond later
pub fn reply(frame: Vec<u8>) -> Script {
    vec![(1, frame)]
}

/// Script answering the next write with a successful, empty reply
pub fn ok_reply(opcode: u8) -> Script {
    reply(encode_response(opcode, STATUS_OK, &[]))
}

/// Streamed tag report for `epc` as the module sends it with full metadata
pub fn tag_report(epc: &[u8], rssi: i8) -> Vec<u8> {
    tag_report_with_data(epc, rssi, &[])
}

/// Streamed tag report carrying embedded memory bank data
pub fn tag_report_with_data(epc: &[u8], rssi: i8, embedded: &[u8]) -> Vec<u8> {
    let mut data = vec![
        0x10, // option
        0x00, 0x1B, // search flags
        0x01, 0xFF, // metadata
        0x01, // tag count
        0x01, // read count
        rssi as u8,
        0x11, // antenna
        0x0E, 0x16, 0x40, // frequency
        0x00, 0x00, 0x01, 0x27, // timestamp
        0x00, 0x00, // phase
        0x05, // protocol
    ];
    data.extend_from_slice(&((embedded.len() * 8) as u16).to_be_bytes());
    data.extend_from_slice(embedded);
    data.push(0x0F); // GPIO
    data.extend_from_slice(&(((epc.len() + 4) * 8) as u16).to_be_bytes());
    data.extend_from_slice(&[0x30, 0x00]);
    data.extend_from_slice(epc);
    data.extend_from_slice(&[0xE9, 0x4A]);
    encode_response(opcode::READ_TAG_ID_MULTIPLE, STATUS_OK, &data)
}
