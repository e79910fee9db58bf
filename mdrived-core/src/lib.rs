//! In-memory model of Sinclair Microdrive cartridges.
//!
//! A cartridge is a circular array of sector slots. Each sector is a pair of
//! fixed-layout byte blocks, a header carrying the sector number and the
//! cartridge name, and a record carrying up to 512 bytes of payload. On the
//! wire all blocks are bit-interleaved ("muxed") and protected by additive
//! checksums; the [codec] module implements both. Two client kinds are
//! supported: the ZX Spectrum with Interface 1, and the Sinclair QL.
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

pub mod annotations;
pub mod block;
pub mod cartridge;
pub mod codec;
pub mod fs;
pub mod header;
pub mod mru;
pub mod record;
pub mod sector;
pub mod validation;

pub use annotations::{Annotation, Annotations};
pub use block::Block;
pub use cartridge::Cartridge;
pub use header::Header;
pub use mru::Mru;
pub use record::Record;
pub use sector::Sector;

/// The default timeout for acquiring a cartridge lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
/// The short timeout used when a drive reports start; on failure the drive
/// simply reports busy instead of stalling the serial loop.
pub const START_LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// The type of client the adapter is attached to.
///
/// The client kind selects field layouts, sync patterns, sector counts and
/// checksum policies. All per-kind decisions are table driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    If1,
    Ql,
}

impl ClientKind {
    /// Number of sector slots on a cartridge.
    #[inline]
    pub const fn sector_count(self) -> usize {
        match self {
            ClientKind::If1 => 254,
            ClientKind::Ql => 255,
        }
    }

    /// Total header block length in bytes, preamble included.
    #[inline]
    pub const fn header_len(self) -> usize {
        match self {
            ClientKind::If1 => 27,
            ClientKind::Ql => 28,
        }
    }

    /// Total record block length in bytes, preamble included.
    #[inline]
    pub const fn record_len(self) -> usize {
        match self {
            ClientKind::If1 => 540,
            ClientKind::Ql => 616,
        }
    }

    /// Length of the file header stored at the start of a file's first
    /// record.
    #[inline]
    pub const fn file_header_len(self) -> usize {
        match self {
            ClientKind::If1 => 9,
            ClientKind::Ql => 64,
        }
    }

    /// The flag byte marking a sector header block on the wire. Records
    /// never carry this value, which is what tells the two apart when the
    /// adapter streams a section of unknown kind.
    #[inline]
    pub const fn header_flag(self) -> u8 {
        match self {
            ClientKind::If1 => 0x01,
            ClientKind::Ql => 0xff,
        }
    }

    /// Maps a sector number to its canonical slot index.
    ///
    /// Interface 1 sectors are numbered from 1, the QL numbers them from 0
    /// with sector 0 holding the sector map.
    #[inline]
    pub fn sector_slot(self, number: usize) -> usize {
        match self {
            ClientKind::If1 => (number.max(1) - 1) % self.sector_count(),
            ClientKind::Ql => number % self.sector_count(),
        }
    }

    /// Maps a slot index back to its canonical sector number.
    #[inline]
    pub fn slot_sector(self, slot: usize) -> usize {
        match self {
            ClientKind::If1 => slot + 1,
            ClientKind::Ql => slot,
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::If1 => f.write_str("IF1"),
            ClientKind::Ql => f.write_str("QL"),
        }
    }
}

/// Errors produced by the cartridge model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid {what} length: want {want}, got {got}")]
    BlockLength { what: &'static str, want: usize, got: usize },
    #[error("unknown field: {0}")]
    UnknownField(&'static str),
    #[error("invalid sector number: {0}")]
    SectorNumber(usize),
    #[error("invalid name: {0}")]
    Name(String),
    #[error("{0}")]
    Validation(String),
    #[error("sector needs at least one of header or record")]
    EmptySector,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("{0}")]
    FileSystem(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A cartridge shared between the serial loop and the control API.
///
/// The mutex is the cartridge lock of the model: it is acquired with a
/// bounded timeout for the duration of any operation that reads or mutates
/// sectors, and held across a drive start/stop window by the serial loop.
pub type SharedCartridge = Arc<Mutex<Cartridge>>;

/// An owned guard on a shared cartridge, detached from the borrow of the
/// slot table so it can be held across commands.
pub type CartGuard = ArcMutexGuard<RawMutex, Cartridge>;

/// Wraps a cartridge for sharing.
pub fn share(cart: Cartridge) -> SharedCartridge {
    Arc::new(Mutex::new(cart))
}

/// Attempts to lock a cartridge within `timeout`.
pub fn lock_cartridge(cart: &SharedCartridge, timeout: Duration) -> Option<CartGuard> {
    cart.try_lock_arc_for(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_kind_tables() {
        assert_eq!(ClientKind::If1.sector_count(), 254);
        assert_eq!(ClientKind::Ql.sector_count(), 255);
        assert_eq!(ClientKind::If1.header_len(), 27);
        assert_eq!(ClientKind::If1.record_len(), 540);
        assert_eq!(ClientKind::Ql.header_len(), 28);
        assert_eq!(ClientKind::Ql.record_len(), 616);
    }

    #[test]
    fn sector_slot_mapping() {
        assert_eq!(ClientKind::If1.sector_slot(1), 0);
        assert_eq!(ClientKind::If1.sector_slot(254), 253);
        assert_eq!(ClientKind::If1.slot_sector(253), 254);
        assert_eq!(ClientKind::Ql.sector_slot(0), 0);
        assert_eq!(ClientKind::Ql.sector_slot(254), 254);
        assert_eq!(ClientKind::Ql.slot_sector(0), 0);
    }

    #[test]
    fn shared_lock_times_out() {
        let cart = share(Cartridge::new(ClientKind::If1));
        let guard = lock_cartridge(&cart, LOCK_TIMEOUT).unwrap();
        assert!(lock_cartridge(&cart, START_LOCK_TIMEOUT).is_none());
        drop(guard);
        assert!(lock_cartridge(&cart, START_LOCK_TIMEOUT).is_some());
    }
}
