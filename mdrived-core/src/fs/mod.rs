//! Read-only file system views over a cartridge.
//!
//! Directory listings and file contents are reconstructed from the sector
//! records: the Interface 1 chains records by file name and record index,
//! the QL goes through the sector map held in sector 0.
use std::io::{self, Read};

use crate::annotations::Annotations;
use crate::record::{Record, FILE_BLOCK_LEN};
use crate::{Cartridge, ClientKind, Result};

pub mod if1;
pub mod ql;

/// Usage statistics of a cartridge file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    sectors: usize,
    used: usize,
}

impl FsStats {
    pub fn new(sectors: usize, used: usize) -> Self {
        FsStats { sectors, used }
    }

    #[inline]
    pub fn sectors(&self) -> usize {
        self.sectors
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }
}

/// A directory entry.
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    size: usize,
    pub annotations: Annotations,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        FileInfo {
            name: name.into(),
            size,
            annotations: Annotations::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A lazily read file reconstructed from sector records.
///
/// Reading yields exactly `size` payload bytes, skipping the file header at
/// the start of the first record and concatenating the 512-byte data blocks
/// of the chained records; the last block may be shorter.
pub struct File {
    info: FileInfo,
    kind: ClientKind,
    records: Vec<Option<Record>>,
    read_pos: usize,
}

impl File {
    pub(crate) fn new(kind: ClientKind, info: FileInfo, records: Vec<Option<Record>>) -> Self {
        File {
            info,
            kind,
            records,
            read_pos: 0,
        }
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn size(&self) -> usize {
        self.info.size
    }

    /// Reads the whole file into a buffer.
    pub fn bytes(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.info.size;
        let skip = self.kind.file_header_len();
        let mut read = 0;
        while read < buf.len() && self.read_pos < size {
            let q = self.read_pos + skip;
            let rec_ix = q / FILE_BLOCK_LEN;
            let off = q % FILE_BLOCK_LEN;
            let rec = self
                .records
                .get(rec_ix)
                .and_then(Option::as_ref)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("missing record at index {}", rec_ix),
                    )
                })?;
            let block_end = FILE_BLOCK_LEN.min(size + skip - rec_ix * FILE_BLOCK_LEN);
            let n = (block_end - off).min(buf.len() - read).min(size - self.read_pos);
            buf[read..read + n].copy_from_slice(&rec.data()[off..off + n]);
            read += n;
            self.read_pos += n;
        }
        Ok(read)
    }
}

/// Lists the cartridge directory.
pub fn ls(cart: &Cartridge) -> Result<(FsStats, Vec<FileInfo>)> {
    match cart.kind() {
        ClientKind::If1 => if1::ls(cart),
        ClientKind::Ql => ql::ls(cart),
    }
}

/// Opens a file by name.
pub fn open(cart: &Cartridge, name: &str) -> Result<File> {
    match cart.kind() {
        ClientKind::If1 => if1::open(cart, name),
        ClientKind::Ql => ql::open(cart, name),
    }
}
