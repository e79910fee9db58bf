/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! The Z80/SNA snapshot packer.
//!
//! An asymmetric format: it reads memory snapshots and produces Interface 1
//! cartridges that restore the machine state when loaded. Snapshot parsing
//! lives here, launcher placement in [launcher], the compressor in
//! [compress] and cartridge assembly in [pack].
use std::io::Read;

use log::debug;

use mdrived_core::Cartridge;

use crate::z80::decompress::{consume_v1_terminator, decompress_z80};
use crate::z80::launcher::{validate_hardware_mode, Launcher};
use crate::z80::reader::SliceReader;
use crate::{Error, Result};

pub mod compress;
pub mod decompress;
pub mod launcher;
pub mod pack;
pub mod reader;

// a snapshot never comes close to this
const MAX_SNAPSHOT_SIZE: u64 = 256_000;

const PAGE_SIZE: usize = 0x4000;

// unused bank marker
const NO_BANK: usize = 99;

pub(crate) struct Snapshot {
    name: String,
    sna: bool,
    version: u8,
    launcher: Launcher,
    main: Vec<u8>,
    bank: [usize; 11],
}

/// Reads a Z80 or SNA snapshot and packs it into a cartridge.
pub fn load(
    input: &mut dyn Read,
    name: &str,
    launcher_style: &str,
    sna: bool,
) -> Result<Cartridge> {
    let mut snap = Snapshot {
        name: name.to_string(),
        sna,
        version: 0,
        launcher: Launcher::new(launcher_style)?,
        main: Vec::new(),
        bank: [NO_BANK; 11],
    };
    snap.unpack(input)?;
    snap.pack()
}

impl Snapshot {
    /// Reads the snapshot header and memory into the flat bank image.
    ///
    /// Layout of the image: 48K memory at 0..49152 (pages 5, 2, 0), then
    /// for 128K snapshots pages 1, 3, 4, 6, 7 at 16K strides.
    fn unpack(&mut self, input: &mut dyn Read) -> Result<()> {
        let mut buf = Vec::new();
        input
            .take(MAX_SNAPSHOT_SIZE)
            .read_to_end(&mut buf)?;
        let mut rd = SliceReader::new(&buf);

        self.launcher.setup(&mut rd, self.sna, buf.len())?;

        let full_size = if self.launcher.is_otek() { 131072 } else { 49152 };
        self.main = vec![0u8; full_size];

        let mut bank_end;
        if self.launcher.is_otek() {
            self.bank[3] = 32768; //   page 0
            self.bank[4] = 49152; //   page 1
            self.bank[5] = 16384; //   page 2
            self.bank[6] = 65536; //   page 3
            self.bank[7] = 81920; //   page 4
            self.bank[8] = 0; //       page 5
            self.bank[9] = 98304; //   page 6
            self.bank[10] = 114688; // page 7
            bank_end = 8;
        } else {
            self.bank[4] = 16384; //   page 2
            self.bank[5] = 32768; //   page 0
            self.bank[8] = 0; //       page 5
            bank_end = 3;
        }

        if self.launcher.add_length() == 0 {
            // version 1 (48K only) or SNA
            self.version = 1;
            if !self.sna && self.launcher.is_compressed() {
                debug!("decompressing version 1 snapshot");
                let src = rd.take(rd.remaining())?;
                let consumed = decompress_z80(src, &mut self.main[..49152])?;
                if !consume_v1_terminator(&src[consumed..]) {
                    debug!("version 1 snapshot without end marker");
                }
            } else {
                debug!("reading snapshot");
                let src = rd.take(49152)?;
                self.main[..49152].copy_from_slice(src);
            }

            let port = self.launcher.post_setup(&mut rd)?;

            if self.launcher.is_otek() {
                self.read_sna_pages(&mut rd, port)?;
            }
        } else {
            // version 2 and 3 store per page length+id records
            self.version = if self.launcher.add_length() == 23 { 2 } else { 3 };
            debug!("reading version {} snapshot", self.version);

            while bank_end > 0 {
                let length = rd.word()?;
                let page = rd.byte()? as usize;
                if page >= self.bank.len() {
                    return Err(Error::Corrupt("corrupted snapshot data".into()));
                }
                let addr = self.bank[page];
                if addr != NO_BANK {
                    if length == 0xffff {
                        let src = rd.take(PAGE_SIZE)?;
                        self.main[addr..addr + PAGE_SIZE].copy_from_slice(src);
                    } else {
                        let src = rd.take(length)?;
                        decompress_z80(src, &mut self.main[addr..addr + PAGE_SIZE])?;
                    }
                }
                bank_end -= 1;
            }
        }

        let hwm = validate_hardware_mode(self.launcher.hardware_mode(), self.version)?;
        self.launcher.adjust_stack_pos(&self.main, self.sna)?;

        debug!(
            "snapshot read: {}, h/w mode {} ({})",
            if self.launcher.is_otek() { "128k" } else { "48k" },
            hwm,
            self.launcher.hardware_mode()
        );
        Ok(())
    }

    // 128K SNA pages follow uncompressed; the page currently mapped at
    // 0xc000 was already part of the 48K block
    fn read_sna_pages(&mut self, rd: &mut SliceReader, port: u8) -> Result<()> {
        let mapped = (port & 7) as usize;
        let mapped_addr = match mapped {
            0 => 32768,
            2 => 16384,
            5 => 0,
            p => self.bank[p + 3],
        };
        // the 48K block holds the mapped page at 0xc000; move it home
        if mapped_addr != 32768 {
            self.main.copy_within(32768..49152, mapped_addr);
        }
        for page in 0..8usize {
            if page == mapped || page == 2 || page == 5 {
                continue;
            }
            let addr = match page {
                0 => 32768,
                p => self.bank[p + 3],
            };
            if addr == NO_BANK {
                continue;
            }
            debug!("reading page {} to {}", page, addr);
            let src = rd.take(PAGE_SIZE)?;
            self.main[addr..addr + PAGE_SIZE].copy_from_slice(src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrived_core::fs;

    // 48K SNA: 27 byte header plus raw memory, PC on the stack
    fn sna_snapshot() -> Vec<u8> {
        let mut snap = vec![0u8; 27];
        snap[0] = 0x3f; // I
        snap[19] = 1; // EI
        snap[21] = 0x84; // F
        snap[22] = 0x42; // A
        snap[23] = 0x00; // SP 0xff00, already decremented by 2
        snap[24] = 0xff;
        snap[25] = 0x01; // IM 1
        snap[26] = 0x02; // border

        let mut memory = vec![0u8; 49152];
        for (i, b) in memory[8000..12000].iter_mut().enumerate() {
            *b = (i % 241) as u8;
        }
        // the program counter sits on the stack
        memory[0xff00 - 16384] = 0x00;
        memory[0xff00 - 16384 + 1] = 0x80;
        snap.extend_from_slice(&memory);
        snap
    }

    #[test]
    fn packs_48k_sna_snapshot() {
        let snap = sna_snapshot();
        let cart = load(&mut &snap[..], "manic", "hidden", true).unwrap();
        let (_, files) = fs::ls(&cart).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["0", "M", "run"]);
    }

    #[test]
    fn rejects_truncated_sna() {
        let snap = vec![0u8; 100];
        assert!(load(&mut &snap[..], "x", "hidden", true).is_err());
    }

    #[test]
    fn rejects_fake_magic_sna() {
        let mut snap = sna_snapshot();
        snap[0] = b'M';
        snap[1] = b'V';
        snap[2] = b' ';
        snap[3] = b'-';
        assert!(load(&mut &snap[..], "x", "hidden", true).is_err());
    }
}
