//! Header/record pairing.
use crate::{Error, Header, Record, Result};

/// A sector is the pair of a header and a record, at least one of which is
/// present.
#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    header: Option<Header>,
    record: Option<Record>,
}

impl Sector {
    pub fn new(header: Option<Header>, record: Option<Record>) -> Result<Self> {
        if header.is_none() && record.is_none() {
            return Err(Error::EmptySector);
        }
        Ok(Sector { header, record })
    }

    /// The sector number: the header's when present, the record's otherwise.
    pub fn index(&self) -> usize {
        match (&self.header, &self.record) {
            (Some(h), _) => h.index(),
            (None, Some(r)) => r.index(),
            (None, None) => 0,
        }
    }

    /// The name of the cartridge this sector belongs to.
    pub fn name(&self) -> String {
        self.header.as_ref().map(Header::name).unwrap_or_default()
    }

    #[inline]
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    #[inline]
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn header_mut(&mut self) -> Option<&mut Header> {
        self.header.as_mut()
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        self.record.as_mut()
    }

    pub fn set_header(&mut self, header: Header) {
        self.header = Some(header);
    }

    pub fn set_record(&mut self, record: Record) {
        self.record = Some(record);
    }

    /// First validation error of either section, header first.
    pub fn validation_error(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(Header::validation_error)
            .or_else(|| self.record.as_ref().and_then(Record::validation_error))
    }
}
