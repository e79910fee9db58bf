/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! Assembles a packed snapshot into a cartridge.
use std::thread;

use log::debug;

use mdrived_core::codec;
use mdrived_core::record::IF1_FLAG_USED;
use mdrived_core::{Cartridge, ClientKind, Header, Record, Sector};

use crate::z80::compress::{decompressf, zxsc, BGAP};
use crate::z80::launcher::{LauncherStyle, SCR_LOAD, SCR_LOAD_START, UNPACK, UNPACK_START};
use crate::z80::Snapshot;
use crate::{Error, Result};

const KIND: ClientKind = ClientKind::If1;

// payload capacity of a file's first record, after the 9-byte file header
const FIRST_RECORD_DATA: usize = 503;
const RECORD_DATA: usize = 512;

// everything below 0x6150 is taken by loader, screen and launcher files
const MAX_MAIN_SIZE: usize = 40624;

/// One output file of the packer.
pub(crate) struct Part {
    file: String,
    data: Vec<u8>,
    length: usize,
    start: usize,
    param: usize,
    data_type: u8,
}

fn compressed_part(file: &str, prefix: &[u8], src: &[u8], start: usize) -> Part {
    let mut data = vec![0u8; prefix.len() + src.len() + src.len() / 128 + 16];
    data[..prefix.len()].copy_from_slice(prefix);
    let n = zxsc(src, &mut data[prefix.len()..]);
    let length = n + prefix.len();
    debug!("{} file: {} bytes", file, length);
    Part {
        file: file.to_string(),
        data,
        length,
        start,
        param: 0xffff,
        data_type: 0x03,
    }
}

fn pack_screen(main: &[u8]) -> Part {
    compressed_part("0", &SCR_LOAD, &main[..6912], SCR_LOAD_START)
}

impl Snapshot {
    /// Compresses all parts, places the launcher and fills the cartridge.
    pub(crate) fn pack(&mut self) -> Result<Cartridge> {
        let otek = self.launcher.is_otek();
        let main_size = self.launcher.main_size();
        let start_pos = self.launcher.start_pos();
        let style = self.launcher.style();

        // the hidden launcher mutates the image while being placed, so it
        // works on a private copy; the page tasks read disjoint slices
        let mut main_cp = self.main.clone();

        let main_image = &self.main;
        let bank = self.bank;
        let launcher = &mut self.launcher;

        let mut scr = None;
        let mut pages: Vec<Part> = Vec::new();
        let mut main_part_data: Option<(Vec<u8>, usize, usize, usize)> = None;

        thread::scope(|s| -> Result<()> {
            let scr_task = s.spawn(|| pack_screen(main_image));

            let mut page_tasks = Vec::new();
            if otek {
                // page 1 carries the unpacker, the others just replace the
                // bank select byte in front of the compressed stream
                page_tasks.push(s.spawn(move || {
                    let from = bank[4];
                    compressed_part("1", &UNPACK, &main_image[from..from + 16384], UNPACK_START)
                }));
                for (file, page_bank, select) in
                    [("2", 6, 0x13u8), ("3", 7, 0x14), ("4", 9, 0x16), ("5", 10, 0x17)]
                {
                    page_tasks.push(s.spawn(move || {
                        let from = bank[page_bank];
                        compressed_part(file, &[select], &main_image[from..from + 16384], 32255)
                    }));
                }
            }

            // main: adaptive compression against the in-place decode
            let main_cp = &mut main_cp;
            let main_res: Result<(Vec<u8>, usize, usize, usize)> = (|| {
                let mut comp = vec![0u8; main_size + 10240];
                let mut delta = 3usize;
                let mut dgap = 0usize;
                let length;
                loop {
                    launcher.byte_series_scan(main_cp, delta, dgap)?;
                    let n = zxsc(
                        &main_cp[start_pos..start_pos + main_size - delta],
                        &mut comp[8704..],
                    );
                    dgap = decompressf(&comp[8704..8704 + n], n, main_size);
                    delta += dgap;
                    if delta > BGAP {
                        return Err(Error::Capacity(format!(
                            "cannot compress main block, delta too large: {} > {}",
                            delta, BGAP
                        )));
                    }
                    if dgap < 1 {
                        length = n;
                        break;
                    }
                }
                let adder = launcher.get_adder(delta, length, MAX_MAIN_SIZE)?;
                launcher.flush_main(&mut comp, main_cp, adder, delta);
                debug!("main file: {} bytes, delta {}", length + adder, delta);
                Ok((comp, length, adder, delta))
            })();

            for t in page_tasks {
                pages.push(
                    t.join()
                        .map_err(|_| Error::Internal("page task panicked".into()))?,
                );
            }
            scr = Some(
                scr_task
                    .join()
                    .map_err(|_| Error::Internal("screen task panicked".into()))?,
            );
            main_part_data = Some(main_res?);
            Ok(())
        })?;

        let (comp, length, adder, _delta) = match main_part_data {
            Some(v) => v,
            None => return Err(Error::Internal("main task produced no data".into())),
        };
        let total = length + adder;
        let main_part = Part {
            file: "M".to_string(),
            data: comp[8704 - adder..8704 + length].to_vec(),
            length: total,
            start: 65536 - total,
            param: 0xffff,
            data_type: 0x03,
        };

        let bln = self.launcher.flush_run();
        let run = Part {
            file: "run".to_string(),
            length: bln.len(),
            data: bln,
            start: 23813,
            param: 0,
            data_type: 0x00,
        };
        debug!("run file: {} bytes", run.length);

        // a stack inside the screen means the launcher landed there too;
        // repack the screen from the mutated image or it would be missing
        let mut scr = match scr {
            Some(p) => p,
            None => return Err(Error::Internal("screen task produced no data".into())),
        };
        let stack_pos = self.launcher.stack_pos();
        if style == LauncherStyle::Hidden && stack_pos > 0 && stack_pos <= 23296 {
            scr = pack_screen(&main_cp);
        }

        let mut cart = Cartridge::new(KIND);
        cart.set_name(&format!("{:<10.10}", self.name));

        // position the access index at the top most sector
        cart.seek_to_start();
        cart.advance_access_ix(false);

        add_to_cartridge(&mut cart, &run)?;
        add_to_cartridge(&mut cart, &scr)?;
        for p in &pages {
            add_to_cartridge(&mut cart, p)?;
        }
        add_to_cartridge(&mut cart, &main_part)?;

        fill_blanks(&mut cart)?;
        Ok(cart)
    }
}

fn sector_header(cart: &Cartridge, slot: usize) -> Result<Header> {
    let mut data = vec![0u8; KIND.header_len()];
    codec::copy_sync_pattern(&mut data);
    data[12] = 0x01;
    data[13] = KIND.slot_sector(slot) as u8;
    for (i, b) in format!("{:<10.10}", cart.name()).bytes().take(10).enumerate() {
        data[16 + i] = b;
    }
    let mut hd = Header::new(KIND, &data, false)?;
    hd.fix_checksum()?;
    Ok(hd)
}

/// Chunks one part into records and places them with sector interleave.
fn add_to_cartridge(cart: &mut Cartridge, p: &Part) -> Result<()> {
    debug!(
        "adding to cartridge: {} length {} start {} type {}",
        p.file, p.length, p.start, p.data_type
    );

    let num_sec = if p.length <= FIRST_RECORD_DATA {
        1
    } else {
        1 + (p.length - FIRST_RECORD_DATA + RECORD_DATA - 1) / RECORD_DATA
    };

    let mut data_pos = 0;
    let mut remaining = p.length;

    for sequence in 0..num_sec {
        let sec_ix = cart.access_ix();
        let hd = sector_header(cart, sec_ix)?;

        let mut rb = vec![0u8; KIND.record_len()];
        codec::copy_sync_pattern(&mut rb);
        rb[12] = IF1_FLAG_USED | if sequence == num_sec - 1 { 0x06 } else { 0x04 };
        rb[13] = sequence as u8;

        let user = if sequence == 0 {
            remaining.min(FIRST_RECORD_DATA)
        } else {
            remaining.min(RECORD_DATA)
        };
        rb[14..16].copy_from_slice(&(user as u16).to_le_bytes());
        for (i, b) in format!("{:<10.10}", p.file).bytes().take(10).enumerate() {
            rb[16 + i] = b;
        }

        let mut off = 27;
        if sequence == 0 {
            // file header: type, length, start, then BASIC length/line or
            // four 0xff bytes for code files
            rb[27] = p.data_type;
            rb[28..30].copy_from_slice(&(p.length as u16).to_le_bytes());
            rb[30..32].copy_from_slice(&(p.start as u16).to_le_bytes());
            if p.data_type == 0x00 {
                rb[32..34].copy_from_slice(&(p.length as u16).to_le_bytes());
                rb[34..36].copy_from_slice(&(p.param as u16).to_le_bytes());
            } else {
                rb[32..36].copy_from_slice(&[0xff; 4]);
            }
            off = 36;
        }

        rb[off..off + user].copy_from_slice(&p.data[data_pos..data_pos + user]);
        data_pos += user;
        remaining -= user;

        let mut rec = Record::new(KIND, &rb, false)?;
        rec.fix_checksums()?;

        cart.set_sector_at(sec_ix, Sector::new(Some(hd), Some(rec))?);
        advance_with_interleave(cart)?;
    }

    // an additional sector gap after each file
    advance_with_interleave(cart)
}

fn advance_with_interleave(cart: &mut Cartridge) -> Result<()> {
    cart.advance_access_ix(false);
    let ix = cart.advance_access_ix(false); // sector interleave
    if cart.get_sector_at(ix).is_some() {
        // A populated slot after a double advance means a full revolution
        // with an even sector count, aligned with the first sector placed.
        // One more step re-aligns with the free slots; for an odd count the
        // second revolution aligns by itself.
        let ix = cart.advance_access_ix(false);
        if cart.get_sector_at(ix).is_some() {
            return Err(Error::Capacity("cartridge full".into()));
        }
    }
    Ok(())
}

fn fill_blanks(cart: &mut Cartridge) -> Result<()> {
    for ix in 0..cart.sector_count() {
        if cart.get_sector_at(ix).is_none() {
            let hd = sector_header(cart, ix)?;
            let rec = Record::generate(KIND)?;
            cart.set_sector_at(ix, Sector::new(Some(hd), Some(rec))?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::z80;
    use mdrived_core::fs;

    // a version 1 Z80 snapshot: 30 byte header plus raw 48K memory
    fn v1_snapshot(memory: &[u8]) -> Vec<u8> {
        assert_eq!(memory.len(), 49152);
        let mut snap = vec![0u8; 30];
        snap[0] = 0x42; // A
        snap[1] = 0x84; // F
        snap[2] = 0x01; // BC
        snap[3] = 0x02;
        snap[4] = 0x03; // HL
        snap[5] = 0x04;
        snap[6] = 0x00; // PC
        snap[7] = 0x80; // 0x8000
        snap[8] = 0x00; // SP 0xff00
        snap[9] = 0xff;
        snap[10] = 0x3f; // I
        snap[11] = 0x20; // R
        snap[12] = 0x02; // border 1, not compressed
        snap[27] = 1; // EI
        snap[29] = 0x01; // IM 1
        snap.extend_from_slice(memory);
        snap
    }

    fn test_memory() -> Vec<u8> {
        let mut memory = vec![0u8; 49152];
        // something screen-like at the front, code-like in the middle
        for (i, b) in memory[..6912].iter_mut().enumerate() {
            *b = (i % 3) as u8;
        }
        for (i, b) in memory[20000..30000].iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        memory
    }

    #[test]
    fn packs_48k_v1_snapshot() {
        let snap = v1_snapshot(&test_memory());
        let cart = z80::load(&mut &snap[..], "jetset", "hidden", false).unwrap();

        assert!(cart.is_formatted());
        assert_eq!(cart.used(), cart.sector_count());

        let (stats, files) = fs::ls(&cart).unwrap();
        assert_eq!(stats.sectors(), 254);
        let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["0", "M", "run"]);
    }

    #[test]
    fn packed_sizes_match_listing() {
        let snap = v1_snapshot(&test_memory());
        let cart = z80::load(&mut &snap[..], "sizes", "hidden", false).unwrap();

        let (_, files) = fs::ls(&cart).unwrap();
        for f in files {
            // every listed file must read back exactly its listed size
            let mut file = fs::open(&cart, f.name()).unwrap();
            assert_eq!(file.bytes().unwrap().len(), f.size());
        }
    }

    #[test]
    fn screen_launcher_packs_too() {
        let snap = v1_snapshot(&test_memory());
        let cart = z80::load(&mut &snap[..], "scr", "screen", false).unwrap();
        let (_, files) = fs::ls(&cart).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["0", "M", "run"]);
    }

    #[test]
    fn run_file_is_basic_with_autostart() {
        let snap = v1_snapshot(&test_memory());
        let cart = z80::load(&mut &snap[..], "base", "hidden", false).unwrap();
        for (_, sec) in cart.iter() {
            if let Some(rec) = sec.record() {
                if rec.name().trim_end() == "run" && rec.index() == 0 {
                    let d = rec.demuxed();
                    assert_eq!(d[27], 0x00, "run must be a BASIC file");
                    // autostart line 0
                    assert_eq!(&d[34..36], &[0, 0]);
                    return;
                }
            }
        }
        panic!("no run file found");
    }

    #[test]
    fn interleave_leaves_gaps() {
        let snap = v1_snapshot(&test_memory());
        let cart = z80::load(&mut &snap[..], "il", "hidden", false).unwrap();
        // the packer interleaves, so the two sectors of a multi sector file
        // must not sit in adjacent slots before blank filling; check that
        // consecutive record sequence numbers are two slots apart
        let mut m_slots = Vec::new();
        for (ix, sec) in cart.iter() {
            if let Some(rec) = sec.record() {
                if rec.name().trim_end() == "M" {
                    m_slots.push((rec.index(), ix));
                }
            }
        }
        m_slots.sort_unstable();
        assert!(m_slots.len() > 2);
        let (_, first) = m_slots[0];
        let (_, second) = m_slots[1];
        let count = cart.sector_count() as isize;
        let dist = ((first as isize - second as isize).rem_euclid(count)).min(
            (second as isize - first as isize).rem_euclid(count),
        );
        assert_eq!(dist, 2);
    }
}
