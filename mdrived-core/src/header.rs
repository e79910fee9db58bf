//! Sector headers.
use crate::block::{Block, Field};
use crate::codec;
use crate::validation::Validation;
use crate::{ClientKind, Error, Result};

static IF1_INDEX: &[Field] = &[
    ("flags", 12, 1),
    ("number", 13, 1),
    ("spares", 14, 2),
    ("name", 16, 10),
    ("header", 12, 14),
    ("checksum", 26, 1),
];

static QL_INDEX: &[Field] = &[
    ("flags", 12, 1),
    ("number", 13, 1),
    ("random", 14, 2),
    ("name", 16, 10),
    ("header", 12, 14),
    ("checksum", 26, 2),
];

/// A sector header: preamble, flags, sector number, cartridge name and
/// checksum.
///
/// Headers keep both representations: the demuxed block for field access
/// and the muxed bytes for replay to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    kind: ClientKind,
    muxed: Vec<u8>,
    block: Block,
    validation: Validation,
}

impl Header {
    /// Builds a header from `data`, demuxing first when `raw` is set.
    ///
    /// A length mismatch is an error; a checksum mismatch is recorded in the
    /// validation state instead, so that shadowing can amend the section
    /// later. Strict callers follow up with [Header::validate].
    pub fn new(kind: ClientKind, data: &[u8], raw: bool) -> Result<Self> {
        if data.len() != kind.header_len() {
            return Err(Error::BlockLength {
                what: "header",
                want: kind.header_len(),
                got: data.len(),
            });
        }
        let plain = if raw { codec::demux(kind, data) } else { data.to_vec() };
        let index = match kind {
            ClientKind::If1 => IF1_INDEX,
            ClientKind::Ql => QL_INDEX,
        };
        let mut h = Header {
            kind,
            muxed: Vec::new(),
            block: Block::new(index, plain),
            validation: Validation::default(),
        };
        h.remux();
        let _ = h.validate();
        Ok(h)
    }

    /// Generates a fresh header for the given sector number and cartridge
    /// name, used when synthesizing sectors missed during shadowing.
    pub fn generate(kind: ClientKind, number: usize, name: &str) -> Result<Self> {
        if number > kind.sector_count() {
            return Err(Error::SectorNumber(number));
        }
        if name.len() > 10 {
            return Err(Error::Name(name.to_string()));
        }
        let mut data = vec![0u8; kind.header_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = kind.header_flag();
        data[13] = number as u8;
        for (i, b) in format!("{:<10}", name).bytes().take(10).enumerate() {
            data[16 + i] = b;
        }
        let mut h = Header::new(kind, &data, false)?;
        h.fix_checksum()?;
        Ok(h)
    }

    #[inline]
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Wire representation, preamble included.
    #[inline]
    pub fn muxed(&self) -> &[u8] {
        &self.muxed
    }

    /// Plain representation, preamble included.
    #[inline]
    pub fn demuxed(&self) -> &[u8] {
        self.block.data()
    }

    fn remux(&mut self) {
        self.muxed = codec::mux(self.kind, self.block.data());
    }

    pub fn flags(&self) -> u8 {
        self.block.get_byte("flags").unwrap_or(0)
    }

    /// The sector number carried by this header.
    pub fn index(&self) -> usize {
        self.block.get_byte("number").unwrap_or(0) as usize
    }

    /// The cartridge name the header belongs to.
    pub fn name(&self) -> String {
        self.block.get_string("name").unwrap_or_default()
    }

    fn stored_checksum(&self) -> u32 {
        match self.kind {
            ClientKind::If1 => self.block.get_byte("checksum").unwrap_or(0) as u32,
            ClientKind::Ql => self.block.get_int("checksum").unwrap_or(0) as u32,
        }
    }

    fn calculate_checksum(&self) -> u32 {
        let sum = self.block.sum("header").unwrap_or(0);
        match self.kind {
            ClientKind::If1 => codec::if1_checksum(sum) as u32,
            ClientKind::Ql => codec::ql_checksum(sum) as u32,
        }
    }

    /// Writes the computed checksum into the checksum field and re-muxes.
    pub fn fix_checksum(&mut self) -> Result<()> {
        let sum = self.calculate_checksum();
        match self.kind {
            ClientKind::If1 => self.block.set_byte("checksum", sum as u8)?,
            ClientKind::Ql => self.block.set_int("checksum", sum as u16)?,
        }
        self.remux();
        self.validation.reset();
        self.validate()
    }

    /// Recomputes the checksum and compares it against the stored value.
    pub fn validate(&mut self) -> Result<()> {
        let want = self.stored_checksum();
        let got = self.calculate_checksum();
        if want != got {
            let msg = format!("invalid sector header check sum, want {}, got {}", want, got);
            self.validation.set_error(msg.clone());
            return Err(Error::Validation(msg));
        }
        self.validation.set_ok();
        Ok(())
    }

    /// Sticks a validation error on the header without altering its bytes.
    pub fn invalidate(&mut self, reason: &str) {
        if self.validation_error().is_none() {
            self.validation.set_error(reason);
        }
    }

    pub fn validation_error(&self) -> Option<&str> {
        self.validation.error()
    }
}
