//! Sector records.
use crate::block::{Block, Field};
use crate::codec;
use crate::validation::Validation;
use crate::{ClientKind, Error, Result};

/// Effective payload of a record. A file block starts at index 0 within the
/// record data; with some client ROMs the data section may extend beyond it.
pub const FILE_BLOCK_LEN: usize = 512;

/// Record flag bit marking an Interface 1 record as in use.
pub const IF1_FLAG_USED: u8 = 0x01;
/// QL sector map file numbers `0xf0..=0xff` are reserved.
pub const QL_RESERVED_FLAGS: u8 = 0xf0;
/// QL file number marking a free sector.
pub const QL_FLAG_FREE: u8 = 0xfd;

static IF1_INDEX: &[Field] = &[
    ("flags", 12, 1),
    ("number", 13, 1),
    ("length", 14, 2),
    ("name", 16, 10),
    ("descriptor", 12, 14),
    ("checksum", 26, 1),
    ("data", 27, 512),
    ("dataChecksum", 539, 1),
    // file header fields, meaningful in a file's first record only
    ("fileType", 27, 1),
    ("fileLength", 28, 2),
    ("fileStart", 30, 2),
    ("lineNumber", 34, 2),
];

static QL_INDEX: &[Field] = &[
    ("flags", 12, 1),
    ("number", 13, 1),
    ("descriptor", 12, 2),
    ("checksum", 14, 2),
    ("data", 16, 512),
    ("dataChecksum", 528, 2),
    ("extra", 530, 84),
    ("extraChecksum", 614, 2),
];

/// A sector record: descriptor, payload and two checksums.
///
/// For the Interface 1 the descriptor carries the file name, the record
/// index within the file and the payload length. For the QL the descriptor
/// is the file number / block number pair; names and lengths live in the
/// 64-byte file header at the start of block 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    kind: ClientKind,
    muxed: Vec<u8>,
    block: Block,
    validation: Validation,
}

impl Record {
    /// Builds a record from `data`, demuxing first when `raw` is set.
    ///
    /// Like headers, checksum mismatches are recorded rather than fatal;
    /// strict callers follow up with [Record::validate].
    pub fn new(kind: ClientKind, data: &[u8], raw: bool) -> Result<Self> {
        if data.len() != kind.record_len() {
            return Err(Error::BlockLength {
                what: "record",
                want: kind.record_len(),
                got: data.len(),
            });
        }
        let plain = if raw { codec::demux(kind, data) } else { data.to_vec() };
        let index = match kind {
            ClientKind::If1 => IF1_INDEX,
            ClientKind::Ql => QL_INDEX,
        };
        let mut r = Record {
            kind,
            muxed: Vec::new(),
            block: Block::new(index, plain),
            validation: Validation::default(),
        };
        r.remux();
        let _ = r.validate();
        Ok(r)
    }

    /// Generates a blank record, used when synthesizing sectors missed
    /// during shadowing.
    pub fn generate(kind: ClientKind) -> Result<Self> {
        let mut data = vec![0u8; kind.record_len()];
        codec::copy_sync_pattern(&mut data);
        if kind == ClientKind::Ql {
            data[12] = QL_FLAG_FREE;
        }
        let mut r = Record::new(kind, &data, false)?;
        r.fix_checksums()?;
        Ok(r)
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

    /// Raw record payload, without descriptor, but possibly including a file
    /// header and extraneous data.
    pub fn data(&self) -> &[u8] {
        self.block.get("data").unwrap_or(&[])
    }

    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        // field offsets are static, so reborrow through the index
        let data = self.block.get("data")?;
        let (off, len) = (data.as_ptr() as usize - self.block.data().as_ptr() as usize, data.len());
        Ok(&mut self.block.data_mut()[off..off + len])
    }

    /// Record flags. For the QL this is the file number.
    pub fn flags(&self) -> u8 {
        self.block.get_byte("flags").unwrap_or(0)
    }

    /// Record index within its file (the block number).
    pub fn index(&self) -> usize {
        self.block.get_byte("number").unwrap_or(0) as usize
    }

    /// Payload length in bytes.
    ///
    /// The Interface 1 stores it in the descriptor. The QL derives it from
    /// the file header of block 0 (total length minus the header itself);
    /// continuation blocks count a full file block.
    pub fn length(&self) -> usize {
        match self.kind {
            ClientKind::If1 => self.block.get_int("length").unwrap_or(0) as usize,
            ClientKind::Ql => {
                if self.index() == 0 {
                    let d = self.data();
                    let total = u32::from_be_bytes([d[0], d[1], d[2], d[3]]) as usize;
                    total.saturating_sub(self.kind.file_header_len())
                } else {
                    FILE_BLOCK_LEN
                }
            }
        }
    }

    /// The file name carried by the record, if applicable.
    pub fn name(&self) -> String {
        match self.kind {
            ClientKind::If1 => self.block.get_string("name").unwrap_or_default(),
            ClientKind::Ql => {
                if self.index() != 0 || self.flags() >= QL_RESERVED_FLAGS {
                    return String::new();
                }
                let d = self.data();
                let len = (u16::from_be_bytes([d[14], d[15]]) as usize).min(36);
                d[16..16 + len]
                    .iter()
                    .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '?' })
                    .collect()
            }
        }
    }

    fn stored(&self, field: &'static str) -> u32 {
        match self.kind {
            ClientKind::If1 => self.block.get_byte(field).unwrap_or(0) as u32,
            ClientKind::Ql => self.block.get_int(field).unwrap_or(0) as u32,
        }
    }

    fn calculated(&self, range: &'static str) -> u32 {
        let sum = self.block.sum(range).unwrap_or(0);
        match self.kind {
            ClientKind::If1 => codec::if1_checksum(sum) as u32,
            ClientKind::Ql => codec::ql_checksum(sum) as u32,
        }
    }

    fn store(&mut self, field: &'static str, value: u32) -> Result<()> {
        match self.kind {
            ClientKind::If1 => self.block.set_byte(field, value as u8),
            ClientKind::Ql => self.block.set_int(field, value as u16),
        }
    }

    /// Writes all computed checksums into their fields and re-muxes.
    pub fn fix_checksums(&mut self) -> Result<()> {
        let desc = self.calculated("descriptor");
        self.store("checksum", desc)?;
        let data = self.calculated("data");
        self.store("dataChecksum", data)?;
        if self.kind == ClientKind::Ql {
            let extra = self.calculated("extra");
            self.store("extraChecksum", extra)?;
        }
        self.remux();
        self.validation.reset();
        self.validate()
    }

    /// Recomputes both checksums, returning the first mismatch.
    pub fn validate(&mut self) -> Result<()> {
        for (field, range, what) in [
            ("checksum", "descriptor", "descriptor"),
            ("dataChecksum", "data", "data"),
        ] {
            let want = self.stored(field);
            let got = self.calculated(range);
            if want != got {
                let msg = format!(
                    "invalid record {} check sum, want {}, got {}",
                    what, want, got
                );
                self.validation.set_error(msg.clone());
                return Err(Error::Validation(msg));
            }
        }
        self.validation.set_ok();
        Ok(())
    }

    /// Sticks a validation error on the record without altering its bytes.
    pub fn invalidate(&mut self, reason: &str) {
        if self.validation_error().is_none() {
            self.validation.set_error(reason);
        }
    }

    pub fn validation_error(&self) -> Option<&str> {
        self.validation.error()
    }
}
