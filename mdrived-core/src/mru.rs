//! Most-recently-used pairing of headers and records.
use crate::{Header, Record, Result, Sector};

/// Pairs the most recent header with the most recent record so the daemon
/// can assemble sectors from the PUT stream.
///
/// A header starts a new pairing; a record arriving while the current pair
/// was already flushed into the cartridge is a record update for that
/// sector rather than a new one.
#[derive(Debug, Default)]
pub struct Mru {
    header: Option<Header>,
    record: Option<Record>,
    flushed: bool,
}

impl Mru {
    pub fn new() -> Self {
        Mru::default()
    }

    /// Replaces the header. A header for a different sector index discards
    /// any pending record.
    pub fn set_header(&mut self, header: Header) {
        if self.header.as_ref().map(Header::index) != Some(header.index()) {
            self.record = None;
            self.flushed = false;
        }
        self.header = Some(header);
    }

    /// Replaces the record.
    pub fn set_record(&mut self, record: Record) {
        self.record = Some(record);
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// True when header and record together form a sector not yet flushed.
    pub fn is_new_sector(&self) -> bool {
        self.header.is_some() && self.record.is_some() && !self.flushed
    }

    /// True when a record arrived for a sector already installed.
    pub fn is_record_update(&self) -> bool {
        self.header.is_some() && self.record.is_some() && self.flushed
    }

    /// Builds the pending sector and marks the pairing as flushed.
    pub fn take_sector(&mut self) -> Result<Sector> {
        let sec = Sector::new(self.header.clone(), self.record.clone())?;
        self.flushed = true;
        Ok(sec)
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.record = None;
        self.flushed = false;
    }
}
