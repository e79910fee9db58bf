//! The daemon: slot table, hardware drive mapping and adapter state.
//!
//! Eight drive slots hold shared references to in-memory cartridges. The
//! serial loop in [serve] owns the conduit and dispatches adapter commands
//! against this state; the control API reads and swaps cartridges through
//! the same slot table.
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use log::info;
use parking_lot::{Mutex, RwLock};

use mdrived_core::{
    lock_cartridge, share, CartGuard, Cartridge, ClientKind, SharedCartridge, LOCK_TIMEOUT,
};
use mdrived_formats::helper;

use crate::conduit::{AdapterInfo, SharedWriter, OP_CONFIG, OP_MAP};

pub mod serve;

/// Number of drive slots, indexed 1 to 8.
pub const DRIVE_COUNT: usize = 8;

bitflags! {
    /// Cartridge state bits reported to the adapter on drive start.
    #[derive(Default)]
    pub struct DriveState: u8 {
        const LOADED    = 0b0000_0001;
        const FORMATTED = 0b0000_0010;
        const READONLY  = 0b0000_0100;
        const ERROR     = 0b1000_0000;
    }
}

bitflags! {
    /// Hardware drive group flag bits of the MAP command.
    #[derive(Default)]
    pub struct MapFlags: u8 {
        const LOCKED     = 0b0000_0001;
        const SHADOWING  = 0b0000_0010;
        const FLAGS_ONLY = 0b1000_0000;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("invalid drive number: {0}")]
    InvalidDrive(usize),
    #[error("drive {0} busy")]
    Busy(usize),
    #[error("cartridge in drive {0} is modified")]
    Conflict(usize),
    #[error("not connected to adapter")]
    NotConnected,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Hardware drive group settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwGroup {
    pub start: usize,
    pub end: usize,
    pub locked: bool,
    pub shadowing: bool,
}

impl HwGroup {
    pub fn is_off(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// The daemon state shared between the serial loop and the control API.
pub struct Daemon {
    client: ClientKind,
    slots: Vec<RwLock<Option<SharedCartridge>>>,
    hw: Mutex<HwGroup>,
    adapter: Mutex<Option<AdapterInfo>>,
    writer: Mutex<Option<SharedWriter>>,
    config: Mutex<HashMap<String, (u8, u8)>>,
    autosave_dir: Option<PathBuf>,
}

impl Daemon {
    pub fn new(client: ClientKind, autosave_dir: Option<PathBuf>) -> Daemon {
        let mut slots = Vec::with_capacity(DRIVE_COUNT);
        for _ in 0..DRIVE_COUNT {
            slots.push(RwLock::new(None));
        }
        Daemon {
            client,
            slots,
            hw: Mutex::new(HwGroup::default()),
            adapter: Mutex::new(None),
            writer: Mutex::new(None),
            config: Mutex::new(HashMap::new()),
            autosave_dir,
        }
    }

    #[inline]
    pub fn client(&self) -> ClientKind {
        self.client
    }

    pub fn autosave_dir(&self) -> Option<&Path> {
        self.autosave_dir.as_deref()
    }

    /// Populates all slots with blank cartridges, restoring auto-saved
    /// images where present.
    pub fn load_cartridges(&self) {
        for ix in 1..=DRIVE_COUNT {
            let cart = self
                .autosave_dir
                .as_deref()
                .and_then(|dir| helper::load_auto_saved(ix, self.client, dir))
                .unwrap_or_else(|| Cartridge::new(self.client));
            *self.slots[ix - 1].write() = Some(share(cart));
        }
        info!("{} drive slots ready", DRIVE_COUNT);
    }

    /// The shared cartridge of a slot, without locking it.
    pub fn slot(&self, ix: usize) -> Option<SharedCartridge> {
        if (1..=DRIVE_COUNT).contains(&ix) {
            self.slots[ix - 1].read().clone()
        } else {
            None
        }
    }

    /// Attempts a one second lock on the cartridge in the given slot.
    ///
    /// `(Some(guard), true)` on success, `(None, true)` when the slot is
    /// empty, `(None, false)` on lock timeout.
    pub fn get_cartridge(&self, ix: usize) -> (Option<CartGuard>, bool) {
        match self.slot(ix) {
            None => (None, true),
            Some(cart) => match lock_cartridge(&cart, LOCK_TIMEOUT) {
                Some(guard) => (Some(guard), true),
                None => (None, false),
            },
        }
    }

    /// Swaps the cartridge of a slot. Fails with [DaemonError::Conflict]
    /// when the present cartridge has unsaved modifications, unless forced.
    pub fn set_cartridge(
        &self,
        ix: usize,
        cart: Cartridge,
        force: bool,
    ) -> Result<(), DaemonError> {
        if !(1..=DRIVE_COUNT).contains(&ix) {
            return Err(DaemonError::InvalidDrive(ix));
        }
        if let Some(present) = self.slot(ix) {
            match lock_cartridge(&present, LOCK_TIMEOUT) {
                None => return Err(DaemonError::Busy(ix)),
                Some(guard) => {
                    if !force && guard.is_modified() {
                        return Err(DaemonError::Conflict(ix));
                    }
                }
            }
        }
        *self.slots[ix - 1].write() = Some(share(cart));
        Ok(())
    }

    /// Replaces the slot content with a blank cartridge.
    pub fn unload_cartridge(&self, ix: usize, force: bool) -> Result<(), DaemonError> {
        self.set_cartridge(ix, Cartridge::new(self.client), force)
    }

    pub fn hardware_drives(&self) -> HwGroup {
        *self.hw.lock()
    }

    /// A drive is a hardware drive iff it falls into a non-zero group.
    pub fn is_hardware_drive(&self, ix: usize) -> bool {
        let hw = self.hw.lock();
        !hw.is_off() && hw.start <= ix && ix <= hw.end
    }

    pub fn is_shadowing(&self) -> bool {
        self.hw.lock().shadowing
    }

    /// Applies a MAP command: bit 0 of `flags` is the group lock, bit 1
    /// shadowing, bit 7 restricts the update to the flags.
    pub fn apply_map(&self, start: usize, end: usize, flags: u8) {
        let flags = MapFlags::from_bits_truncate(flags);
        let mut hw = self.hw.lock();
        hw.locked = flags.contains(MapFlags::LOCKED);
        hw.shadowing = flags.contains(MapFlags::SHADOWING);
        if !flags.contains(MapFlags::FLAGS_ONLY) {
            hw.start = start;
            hw.end = end;
        }
        info!(
            "MAP: start {} end {} locked {} shadowing {}",
            hw.start, hw.end, hw.locked, hw.shadowing
        );
    }

    /// Maps the hardware drive group and notifies the adapter.
    pub fn map_hardware_drives(&self, start: usize, end: usize) -> Result<(), DaemonError> {
        if start > end || end > DRIVE_COUNT || (start == 0) != (end == 0) {
            return Err(DaemonError::Invalid(format!(
                "invalid hardware drive group: {}..{}",
                start, end
            )));
        }
        let flags = {
            let mut hw = self.hw.lock();
            hw.start = start;
            hw.end = end;
            hw_flags(&hw)
        };
        self.send_frame([OP_MAP, start as u8, end as u8, flags.bits()])
    }

    /// Switches hardware drive shadowing and notifies the adapter.
    pub fn shadow_hardware_drives(&self, on: bool) -> Result<(), DaemonError> {
        let flags = {
            let mut hw = self.hw.lock();
            hw.shadowing = on;
            hw_flags(&hw) | MapFlags::FLAGS_ONLY
        };
        self.send_frame([OP_MAP, 0, 0, flags.bits()])
    }

    /// Forwards a configuration item to the adapter. `rumble` is the only
    /// recognized item.
    pub fn configure(&self, item: &str, arg1: u8, arg2: u8) -> Result<(), DaemonError> {
        let code = match item {
            "rumble" => 1u8,
            other => {
                return Err(DaemonError::Invalid(format!(
                    "unknown config item: '{}'",
                    other
                )))
            }
        };
        self.send_frame([OP_CONFIG, code, arg1, arg2])?;
        self.config.lock().insert(item.to_string(), (arg1, arg2));
        Ok(())
    }

    pub fn config_item(&self, item: &str) -> Option<(u8, u8)> {
        self.config.lock().get(item).copied()
    }

    fn send_frame(&self, frame: [u8; 4]) -> Result<(), DaemonError> {
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(w) => {
                let mut w = w.lock();
                w.write_all(&frame)?;
                w.flush()?;
                Ok(())
            }
            None => Err(DaemonError::NotConnected),
        }
    }

    pub(crate) fn set_writer(&self, writer: Option<SharedWriter>) {
        *self.writer.lock() = writer;
    }

    pub(crate) fn set_adapter_info(&self, info: Option<AdapterInfo>) {
        *self.adapter.lock() = info;
    }

    pub fn adapter_info(&self) -> Option<AdapterInfo> {
        *self.adapter.lock()
    }
}

fn hw_flags(hw: &HwGroup) -> MapFlags {
    let mut flags = MapFlags::default();
    flags.set(MapFlags::LOCKED, hw.locked);
    flags.set(MapFlags::SHADOWING, hw.shadowing);
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon() -> Daemon {
        let d = Daemon::new(ClientKind::If1, None);
        d.load_cartridges();
        d
    }

    #[test]
    fn slots_start_blank() {
        let d = daemon();
        for ix in 1..=DRIVE_COUNT {
            let (guard, locked) = d.get_cartridge(ix);
            assert!(locked);
            let guard = guard.unwrap();
            assert!(!guard.is_formatted());
        }
        assert!(d.slot(0).is_none());
        assert!(d.slot(9).is_none());
    }

    #[test]
    fn busy_slot_reports_lock_failure() {
        let d = daemon();
        let (held, _) = d.get_cartridge(1);
        let _held = held.unwrap();
        // a second locker must give up after the timeout
        let (guard, locked) = d.get_cartridge(1);
        assert!(guard.is_none());
        assert!(!locked);
    }

    #[test]
    fn modified_cartridge_blocks_swap() {
        let d = daemon();
        {
            let (guard, _) = d.get_cartridge(2);
            guard.unwrap().set_modified(true);
        }
        let err = d
            .set_cartridge(2, Cartridge::new(ClientKind::If1), false)
            .unwrap_err();
        assert!(matches!(err, DaemonError::Conflict(2)));
        d.set_cartridge(2, Cartridge::new(ClientKind::If1), true)
            .unwrap();
        let (guard, _) = d.get_cartridge(2);
        assert!(!guard.unwrap().is_modified());
    }

    #[test]
    fn hardware_group() {
        let d = daemon();
        assert!(!d.is_hardware_drive(1));
        d.apply_map(2, 4, MapFlags::SHADOWING.bits());
        assert!(d.is_shadowing());
        assert!(!d.is_hardware_drive(1));
        assert!(d.is_hardware_drive(2));
        assert!(d.is_hardware_drive(4));
        assert!(!d.is_hardware_drive(5));
        // flags only: group stays
        d.apply_map(0, 0, (MapFlags::FLAGS_ONLY | MapFlags::LOCKED).bits());
        let hw = d.hardware_drives();
        assert_eq!((hw.start, hw.end), (2, 4));
        assert!(hw.locked);
        assert!(!hw.shadowing);
    }

    #[test]
    fn config_requires_connection() {
        let d = daemon();
        assert!(matches!(
            d.configure("rumble", 30, 0),
            Err(DaemonError::NotConnected)
        ));
        assert!(matches!(
            d.configure("volume", 1, 0),
            Err(DaemonError::Invalid(_))
        ));
    }
}
