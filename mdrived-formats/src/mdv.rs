/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! The `.mdv` cartridge image format (QL).
//!
//! 255 sectors of 644 bytes (28-byte muxed header, 616-byte muxed record)
//! plus the trailing write protection byte.
use std::io::{Read, Write};

use mdrived_core::{Cartridge, ClientKind};

use crate::mdr::{read_image, write_image};
use crate::Result;

const KIND: ClientKind = ClientKind::Ql;

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
    use mdrived_core::{Header, Record, Sector};

    #[test]
    fn roundtrip() {
        let mut cart = Cartridge::new(KIND);
        let hd = Header::generate(KIND, 7, "ql").unwrap();
        let mut data = vec![0u8; KIND.record_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = 2;
        data[13] = 0;
        data[16..20].copy_from_slice(&100u32.to_be_bytes());
        let mut rec = Record::new(KIND, &data, false).unwrap();
        rec.fix_checksums().unwrap();
        cart.set_sector_at(7, Sector::new(Some(hd), Some(rec)).unwrap());

        let mut image = Vec::new();
        write(&mut cart, &mut image).unwrap();
        assert_eq!(image.len(), 255 * 644 + 1);

        let mut again = read(&mut &image[..], true, false).unwrap();
        assert_eq!(again.used(), 1);
        let sec = again.get_next_sector().unwrap();
        assert_eq!(sec.index(), 7);
        assert_eq!(sec.record().unwrap().flags(), 2);
    }
}
