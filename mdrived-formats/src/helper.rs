/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! Cartridge housekeeping: canonical reordering and auto-save.
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use mdrived_core::{Cartridge, ClientKind};

use crate::{mdr, mdv, Result};

/// Moves every sector to its canonical slot so that access order traversal
/// yields descending sector numbers. Sector contents are not touched;
/// colliding or surplus sectors keep their relative order in the leftover
/// slots.
pub fn repair_order(cart: &mut Cartridge) {
    let count = cart.sector_count();
    let kind = cart.kind();
    let was_modified = cart.is_modified();

    let mut sectors = Vec::new();
    for ix in 0..count {
        if let Some(sec) = cart.take_sector_at(ix) {
            sectors.push(sec);
        }
    }

    let mut leftover = Vec::new();
    for sec in sectors {
        let slot = kind.sector_slot(sec.index());
        if cart.get_sector_at(slot).is_none() {
            cart.set_sector_at(slot, sec);
        } else {
            leftover.push(sec);
        }
    }
    if !leftover.is_empty() {
        warn!("{} sectors without a free canonical slot", leftover.len());
        let free: Vec<usize> = (0..count)
            .filter(|&ix| cart.get_sector_at(ix).is_none())
            .collect();
        for (sec, ix) in leftover.into_iter().zip(free) {
            cart.set_sector_at(ix, sec);
        }
    }

    cart.seek_to_start();
    cart.set_modified(was_modified);
}

fn autosave_path(dir: &Path, drive: usize, kind: ClientKind) -> PathBuf {
    let ext = match kind {
        ClientKind::If1 => "mdr",
        ClientKind::Ql => "mdv",
    };
    dir.join(format!("drive{}.{}.gz", drive, ext))
}

/// Serializes a modified cartridge into the auto-save directory, clearing
/// the modified flag and marking the cartridge auto-saved.
pub fn auto_save(drive: usize, cart: &mut Cartridge, dir: &Path) -> Result<()> {
    if !cart.is_modified() || cart.is_autosaved() {
        debug!("drive {}: nothing to auto-save", drive);
        return Ok(());
    }

    fs::create_dir_all(dir)?;
    let path = autosave_path(dir, drive, cart.kind());
    let file = fs::File::create(&path)?;
    let mut gz = GzEncoder::new(file, Compression::default());
    match cart.kind() {
        ClientKind::If1 => mdr::write(cart, &mut gz)?,
        ClientKind::Ql => mdv::write(cart, &mut gz)?,
    }
    gz.finish()?;

    cart.set_modified(false);
    cart.set_autosaved(true);
    info!("drive {} auto-saved to {}", drive, path.display());
    Ok(())
}

/// Loads the auto-saved cartridge of a drive, if one exists.
pub fn load_auto_saved(drive: usize, kind: ClientKind, dir: &Path) -> Option<Cartridge> {
    let path = autosave_path(dir, drive, kind);
    let file = fs::File::open(&path).ok()?;
    let mut gz: Box<dyn Read> = Box::new(GzDecoder::new(file));
    let res = match kind {
        ClientKind::If1 => mdr::read(&mut gz, false, false),
        ClientKind::Ql => mdv::read(&mut gz, false, false),
    };
    match res {
        Ok(mut cart) => {
            cart.set_autosaved(true);
            info!("drive {} restored from {}", drive, path.display());
            Some(cart)
        }
        Err(e) => {
            warn!("cannot restore drive {} from {}: {}", drive, path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrived_core::{Header, Record, Sector};

    fn sector(number: usize) -> Sector {
        let hd = Header::generate(ClientKind::If1, number, "order").unwrap();
        let rec = Record::generate(ClientKind::If1).unwrap();
        Sector::new(Some(hd), Some(rec)).unwrap()
    }

    #[test]
    fn repair_moves_sectors_to_canonical_slots() {
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_sector_at(100, sector(3));
        cart.set_sector_at(101, sector(1));
        cart.set_sector_at(102, sector(2));
        cart.set_modified(false);

        repair_order(&mut cart);
        assert!(!cart.is_modified());
        assert_eq!(cart.get_sector_at(0).unwrap().index(), 1);
        assert_eq!(cart.get_sector_at(1).unwrap().index(), 2);
        assert_eq!(cart.get_sector_at(2).unwrap().index(), 3);
        assert!(cart.get_sector_at(100).is_none());

        // traversal yields descending sector numbers
        let a = cart.get_next_sector().unwrap().index();
        let b = cart.get_next_sector().unwrap().index();
        let c = cart.get_next_sector().unwrap().index();
        assert_eq!((a, b, c), (3, 2, 1));
    }

    #[test]
    fn auto_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_sector_at(5, sector(6));
        assert!(cart.is_modified());

        auto_save(2, &mut cart, dir.path()).unwrap();
        assert!(!cart.is_modified());
        assert!(cart.is_autosaved());

        let restored = load_auto_saved(2, ClientKind::If1, dir.path()).unwrap();
        assert!(restored.is_autosaved());
        assert_eq!(restored.used(), 1);
        assert!(load_auto_saved(3, ClientKind::If1, dir.path()).is_none());
    }

    #[test]
    fn unmodified_cartridge_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut cart = Cartridge::new(ClientKind::If1);
        auto_save(1, &mut cart, dir.path()).unwrap();
        assert!(load_auto_saved(1, ClientKind::If1, dir.path()).is_none());
    }
}
