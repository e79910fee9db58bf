/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! The `.mdr` cartridge image format (Interface 1).
//!
//! 254 sectors of 543 bytes, each the concatenation of the muxed 27-byte
//! header and the muxed 540-byte record, minus their shared preamble
//! overlap being kept: both blocks keep their preambles, the file simply
//! stores them back to back. A single trailing byte carries the write
//! protection flag.
use std::io::{Read, Write};

use log::debug;

use mdrived_core::{Cartridge, ClientKind, Header, Record, Sector};

use crate::{Error, Result};

const KIND: ClientKind = ClientKind::If1;

fn sector_size(kind: ClientKind) -> usize {
    kind.header_len() + kind.record_len()
}

/// Reads a cartridge image. Shared by the MDR and MDV formats.
pub(crate) fn read_image(
    kind: ClientKind,
    input: &mut dyn Read,
    strict: bool,
    repair: bool,
) -> Result<Cartridge> {
    let chunk = sector_size(kind);
    let expect = kind.sector_count() * chunk;

    let mut data = Vec::with_capacity(expect + 1);
    input.read_to_end(&mut data)?;
    if data.len() != expect && data.len() != expect + 1 {
        return Err(Error::Corrupt(format!(
            "invalid {} cartridge size: want {} or {} bytes, got {}",
            kind,
            expect,
            expect + 1,
            data.len()
        )));
    }

    let mut cart = Cartridge::new(kind);

    for i in 0..kind.sector_count() {
        let at = i * chunk;
        let ix = cart.advance_access_ix(false);
        let block = &data[at..at + chunk];
        if block.iter().all(|&b| b == 0) {
            continue; // blank slot
        }
        let mut hd = Header::new(kind, &block[..kind.header_len()], true)?;
        let mut rec = Record::new(kind, &block[kind.header_len()..], true)?;
        if strict {
            hd.validate().map_err(|e| {
                Error::Corrupt(format!("sector {} header: {}", i, e))
            })?;
            rec.validate().map_err(|e| {
                Error::Corrupt(format!("sector {} record: {}", i, e))
            })?;
        }
        cart.set_sector_at(ix, Sector::new(Some(hd), Some(rec))?);
    }

    if data.len() == expect + 1 {
        cart.set_write_protected(data[expect] != 0);
    }

    if repair {
        crate::helper::repair_order(&mut cart);
    }

    cart.set_modified(false);
    cart.seek_to_start();
    debug!("{} cartridge read: {} sectors", kind, cart.used());
    Ok(cart)
}

/// Writes a cartridge image: sectors in access order starting from the top
/// most, blank slots as zero blocks, then the write protection byte.
pub(crate) fn write_image(
    kind: ClientKind,
    cart: &mut Cartridge,
    out: &mut dyn Write,
) -> Result<()> {
    let chunk = sector_size(kind);
    cart.seek_to_start();

    for _ in 0..cart.sector_count() {
        let ix = cart.advance_access_ix(false);
        match cart.get_sector_at(ix) {
            Some(sec) => {
                match sec.header() {
                    Some(h) => out.write_all(h.muxed())?,
                    None => out.write_all(&vec![0u8; kind.header_len()])?,
                }
                match sec.record() {
                    Some(r) => out.write_all(r.muxed())?,
                    None => out.write_all(&vec![0u8; kind.record_len()])?,
                }
            }
            None => out.write_all(&vec![0u8; chunk])?,
        }
    }
    out.write_all(&[if cart.is_write_protected() { 1 } else { 0 }])?;
    Ok(())
}

pub fn read(input: &mut dyn Read, strict: bool, repair: bool) -> Result<Cartridge> {
    read_image(KIND, input, strict, repair)
}

pub fn write(cart: &mut Cartridge, out: &mut dyn Write) -> Result<()> {
    write_image(KIND, cart, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrived_core::codec;

    fn sector(number: usize, name: &str, payload: u8) -> Sector {
        let hd = Header::generate(KIND, number, name).unwrap();
        let mut data = vec![0u8; KIND.record_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = 0x05;
        data[13] = 0;
        data[14] = 0x00;
        data[15] = 0x02;
        data[16..26].copy_from_slice(format!("{:<10}", name).as_bytes());
        for b in data[27..539].iter_mut() {
            *b = payload;
        }
        let mut rec = Record::new(KIND, &data, false).unwrap();
        rec.fix_checksums().unwrap();
        Sector::new(Some(hd), Some(rec)).unwrap()
    }

    #[test]
    fn roundtrip_preserves_sectors() {
        let mut cart = Cartridge::new(KIND);
        cart.set_sector_at(10, sector(11, "roundtrip", 0xaa));
        cart.set_sector_at(50, sector(51, "roundtrip", 0x55));
        cart.set_write_protected(true);

        let mut image = Vec::new();
        write(&mut cart, &mut image).unwrap();
        assert_eq!(image.len(), 254 * 543 + 1);

        let mut again = read(&mut &image[..], true, false).unwrap();
        assert!(again.is_write_protected());
        assert!(!again.is_modified());
        assert_eq!(again.used(), 2);

        // the sector sequence in access order must be identical
        cart.seek_to_start();
        again.seek_to_start();
        for _ in 0..2 {
            let a = cart.get_next_sector().unwrap().clone();
            let b = again.get_next_sector().unwrap().clone();
            assert_eq!(a.index(), b.index());
            assert_eq!(
                a.header().unwrap().demuxed(),
                b.header().unwrap().demuxed()
            );
            assert_eq!(
                a.record().unwrap().demuxed(),
                b.record().unwrap().demuxed()
            );
        }
    }

    #[test]
    fn double_roundtrip_is_stable() {
        let mut cart = Cartridge::new(KIND);
        cart.set_sector_at(0, sector(1, "stable", 1));
        let mut image = Vec::new();
        write(&mut cart, &mut image).unwrap();
        let mut again = read(&mut &image[..], true, false).unwrap();
        let mut image2 = Vec::new();
        write(&mut again, &mut image2).unwrap();
        assert_eq!(image, image2);
    }

    #[test]
    fn rejects_bad_size() {
        let image = vec![0u8; 100];
        assert!(matches!(
            read(&mut &image[..], true, false),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn strict_read_rejects_corrupt_checksums() {
        let mut cart = Cartridge::new(KIND);
        cart.set_sector_at(10, sector(11, "bad", 0));
        let mut image = Vec::new();
        write(&mut cart, &mut image).unwrap();
        image[300] ^= 0xff; // corrupt the first sector's record payload
        assert!(read(&mut &image[..], true, false).is_err());
        assert!(read(&mut &image[..], false, false).is_ok());
    }
}
