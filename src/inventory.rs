//! Multi-tag inventory: collect streamed tag reports over a time window and
//! match them against a roster of known tags.

use std::collections::HashMap;
use std::mem;

use log::{debug, info, warn};

use crate::gen2::Gen2Config;
use crate::reader::NanoRfid;
use crate::stream::{ContinuousRead, StreamFrame};
use crate::transport::{Clock, RfidTransport};
use crate::types::{Epc, TagRecord, UhfError};

/// Pause between polls in [`NanoRfid::scan`]
const SCAN_POLL_MS: u32 = 5;

/// A tag the caller expects to find
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub epc: Epc,
    /// Seen during the current scan
    pub matched: bool,
}

/// The set of known tags a scan looks for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a known tag. EPCs must be unique within the roster.
    pub fn add(&mut self, name: impl Into<String>, epc: Epc) -> Result<(), UhfError> {
        let name = name.into();
        if let Some(existing) = self.entries.iter().find(|e| e.epc == epc) {
            return Err(UhfError::InvalidParameter(format!(
                "EPC {} of {:?} already in roster as {:?}",
                epc, name, existing.name
            )));
        }
        self.entries.push(RosterEntry {
            name,
            epc,
            matched: false,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry matched. An empty roster is never complete.
    pub fn is_complete(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.matched)
    }

    pub fn contains(&self, epc: &Epc) -> bool {
        self.entries.iter().any(|e| &e.epc == epc)
    }

    pub fn missing(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter().filter(|e| !e.matched)
    }

    /// Flag the entry for `epc`. Returns its name if it was not matched before.
    fn mark(&mut self, epc: &Epc) -> Option<&str> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| !e.matched && &e.epc == epc)?;
        entry.matched = true;
        Some(&entry.name)
    }

    fn clear_matches(&mut self) {
        for entry in &mut self.entries {
            entry.matched = false;
        }
    }
}

/// Settings for one inventory scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// How long to collect reports before giving up on missing roster entries
    pub window_ms: u64,
    /// Applied before streaming starts
    pub gen2: Gen2Config,
    /// Module-side duplicate filter; off so every read is reported
    pub read_filter: bool,
    pub stream: ContinuousRead,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            gen2: Gen2Config::default(),
            read_filter: false,
            stream: ContinuousRead::default(),
        }
    }
}

/// First sighting and read count of one distinct EPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenTag {
    pub epc: Epc,
    pub first_rssi: i8,
    /// Milliseconds from scan start to the first report
    pub first_seen_ms: u64,
    pub read_count: u32,
    /// Bank data from the first report, empty without a bank read
    pub data: Vec<u8>,
}

/// Accumulated state of a running scan
#[derive(Debug, Default)]
pub struct ScanSession {
    roster: Roster,
    window_ms: u64,
    started_ms: u64,
    report_temperature: bool,
    seen: Vec<SeenTag>,
    index: HashMap<Epc, usize>,
    pub total_reads: u32,
    pub parse_errors: u32,
    pub corrupt_frames: u32,
    pub keep_alives: u32,
    pub thermal_warnings: u32,
    /// Latest streamed module temperature
    pub temperature: Option<i8>,
}

impl ScanSession {
    fn new(mut roster: Roster, config: &ScanConfig, started_ms: u64) -> Self {
        roster.clear_matches();
        Self {
            roster,
            window_ms: config.window_ms,
            started_ms,
            report_temperature: config.stream.report_temperature,
            ..Self::default()
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Distinct tags in order of first sighting
    pub fn seen(&self) -> &[SeenTag] {
        &self.seen
    }

    pub fn get(&self, epc: &Epc) -> Option<&SeenTag> {
        self.index.get(epc).map(|&i| &self.seen[i])
    }

    /// Count a tag report. Returns true if it completed the roster.
    fn record(&mut self, tag: &TagRecord, now_ms: u64) -> bool {
        self.total_reads += 1;

        match self.index.get(&tag.epc) {
            Some(&i) => self.seen[i].read_count += 1,
            None => {
                self.index.insert(tag.epc.clone(), self.seen.len());
                self.seen.push(SeenTag {
                    epc: tag.epc.clone(),
                    first_rssi: tag.rssi,
                    first_seen_ms: now_ms.saturating_sub(self.started_ms),
                    read_count: 1,
                    data: tag.data.clone(),
                });
                debug!("New tag {} at {} dBm", tag.epc, tag.rssi);
            }
        }

        match self.roster.mark(&tag.epc) {
            Some(name) => {
                info!("Roster tag {:?} present ({})", name, tag.epc);
                self.roster.is_complete()
            }
            None => false,
        }
    }

    fn into_report(self, elapsed_ms: u64) -> ScanReport {
        let outcome = if self.seen.is_empty() {
            ScanOutcome::NoTagsSeen
        } else if self.roster.missing().next().is_none() {
            ScanOutcome::RosterComplete
        } else {
            ScanOutcome::RosterIncomplete {
                missing: self.roster.missing().map(|e| e.name.clone()).collect(),
            }
        };
        let present = self
            .roster
            .entries()
            .iter()
            .filter(|e| e.matched)
            .map(|e| e.name.clone())
            .collect();
        let unmatched_tags = self
            .seen
            .iter()
            .filter(|t| !self.roster.contains(&t.epc))
            .count();

        ScanReport {
            outcome,
            present,
            unmatched_tags,
            tags: self.seen,
            total_reads: self.total_reads,
            parse_errors: self.parse_errors,
            corrupt_frames: self.corrupt_frames,
            keep_alives: self.keep_alives,
            thermal_warnings: self.thermal_warnings,
            temperature: self.temperature,
            elapsed_ms,
        }
    }
}

/// Result of one [`Inventory::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProgress {
    /// Still collecting
    Streaming,
    /// Every roster entry has been seen
    RosterComplete,
    /// The scan window is over
    WindowElapsed,
}

impl ScanProgress {
    pub fn is_done(self) -> bool {
        self != ScanProgress::Streaming
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No tag at all was reported during the window
    NoTagsSeen,
    RosterComplete,
    /// Names of the roster entries not seen
    RosterIncomplete { missing: Vec<String> },
}

/// Summary of a finished scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    /// Names of the roster entries seen
    pub present: Vec<String>,
    /// Distinct EPCs seen that are not in the roster
    pub unmatched_tags: usize,
    /// Every distinct EPC seen, in order of first sighting
    pub tags: Vec<SeenTag>,
    pub total_reads: u32,
    pub parse_errors: u32,
    pub corrupt_frames: u32,
    pub keep_alives: u32,
    pub thermal_warnings: u32,
    pub temperature: Option<i8>,
    pub elapsed_ms: u64,
}

/// A running scan. Holds the reader exclusively until finished or dropped;
/// dropping it stops the stream.
pub struct Inventory<'a, T: RfidTransport, C: Clock> {
    reader: &'a mut NanoRfid<T, C>,
    session: ScanSession,
    active: bool,
}

impl<T: RfidTransport, C: Clock> Inventory<'_, T, C> {
    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.reader.clock.elapsed_since(self.session.started_ms)
    }

    /// Process whatever input is available without waiting for more.
    ///
    /// Stops consuming input as soon as the roster is complete. Frames that
    /// fail validation or parsing are counted and skipped; transport errors
    /// are returned.
    pub fn tick(&mut self) -> Result<ScanProgress, UhfError> {
        if self.session.roster.is_complete() {
            return Ok(ScanProgress::RosterComplete);
        }

        loop {
            match self.reader.poll_stream() {
                Ok(Some(frame)) => {
                    if self.handle(frame) {
                        return Ok(ScanProgress::RosterComplete);
                    }
                }
                Ok(None) => break,
                Err(UhfError::Corrupt { computed, received }) => {
                    self.session.corrupt_frames += 1;
                    warn!(
                        "Dropped corrupt stream frame (CRC 0x{:04X}, expected 0x{:04X})",
                        received, computed
                    );
                }
                Err(e @ (UhfError::ParseError(_) | UhfError::InvalidResponse(_))) => {
                    self.session.parse_errors += 1;
                    warn!("Dropped stream frame: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        if self.elapsed_ms() >= self.session.window_ms {
            Ok(ScanProgress::WindowElapsed)
        } else {
            Ok(ScanProgress::Streaming)
        }
    }

    fn handle(&mut self, frame: StreamFrame) -> bool {
        match frame {
            StreamFrame::Tag(tag) => {
                let now = self.reader.clock.now_ms();
                return self.session.record(&tag, now);
            }
            StreamFrame::KeepAlive => self.session.keep_alives += 1,
            StreamFrame::ThermalThrottle => {
                self.session.thermal_warnings += 1;
                warn!("Module is throttling for temperature");
            }
            StreamFrame::Temperature(celsius) => {
                if self.session.report_temperature {
                    self.session.temperature = Some(celsius);
                }
            }
            StreamFrame::Status(status) => debug!("Stream status 0x{:04X}", status),
            StreamFrame::Unclassified { len, status } => {
                debug!("Unclassified stream frame: {} bytes, status 0x{:04X}", len, status)
            }
            StreamFrame::Foreign { opcode, status } => {
                debug!("Ignoring opcode 0x{:02X} (status 0x{:04X}) while streaming", opcode, status)
            }
        }
        false
    }

    /// Stop streaming and summarize the scan
    pub fn finish(mut self) -> Result<ScanReport, UhfError> {
        let elapsed = self.elapsed_ms();
        self.active = false;
        self.reader.stop_continuous()?;

        let report = mem::take(&mut self.session).into_report(elapsed);
        info!(
            "Inventory finished after {} ms: {:?}, {} distinct tags, {} reads",
            report.elapsed_ms,
            report.outcome,
            report.tags.len(),
            report.total_reads
        );
        Ok(report)
    }
}

impl<T: RfidTransport, C: Clock> Drop for Inventory<'_, T, C> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.reader.stop_continuous() {
                warn!("Failed to stop continuous read: {}", e);
            }
        }
    }
}

impl<T: RfidTransport, C: Clock> NanoRfid<T, C> {
    /// Configure the module and start streaming for an inventory scan.
    ///
    /// Matched flags in `roster` are cleared. A failing setting aborts before
    /// streaming starts.
    pub fn inventory(
        &mut self,
        roster: Roster,
        config: &ScanConfig,
    ) -> Result<Inventory<'_, T, C>, UhfError> {
        self.set_read_filter(config.read_filter)?;
        if config.stream.bank_read.is_some() {
            self.set_unique_by_data(true)?;
        }
        self.apply_gen2_config(&config.gen2)?;
        self.start_continuous(&config.stream)?;

        info!(
            "Inventory started: {} roster entries, {} ms window",
            roster.len(),
            config.window_ms
        );
        let started = self.clock.now_ms();
        Ok(Inventory {
            reader: self,
            session: ScanSession::new(roster, config, started),
            active: true,
        })
    }

    /// Run a complete inventory scan
    pub fn scan(&mut self, roster: Roster, config: &ScanConfig) -> Result<ScanReport, UhfError> {
        let mut inventory = self.inventory(roster, config)?;
        while !inventory.tick()?.is_done() {
            inventory.reader.clock.delay_ms(SCAN_POLL_MS);
        }
        inventory.finish()
    }
}
