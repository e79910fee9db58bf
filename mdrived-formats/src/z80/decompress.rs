/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! Run-length decoding of Z80 snapshot memory blocks.
//!
//! A sequence `ED ED n b` expands to `n` copies of `b`; a lone `ED` is a
//! literal, as is everything else. Version 1 snapshots terminate the stream
//! with `00 ED ED 00`; version 2/3 memory blocks are length-bounded instead.
use memchr::memchr;

use crate::{Error, Result};

/// Decodes compressed snapshot memory from `src` into all of `target`,
/// returning the number of source bytes consumed.
pub fn decompress_z80(src: &[u8], target: &mut [u8]) -> Result<usize> {
    let mut cursor = 0;
    let mut out = 0;

    while out < target.len() {
        let rest = &src[cursor..];
        if rest.is_empty() {
            return Err(Error::Corrupt("compressed memory block truncated".into()));
        }
        match rest {
            [0xed, 0xed, repeat, fill, ..] => {
                let n = (*repeat as usize).min(target.len() - out);
                if *repeat == 0 {
                    return Err(Error::Corrupt("zero length repeat sequence".into()));
                }
                for b in target[out..out + n].iter_mut() {
                    *b = *fill;
                }
                out += n;
                cursor += 4;
            }
            _ => {
                // literal run up to the next possible repeat marker
                let span = match memchr(0xed, rest) {
                    Some(0) => 1, // lone ED
                    Some(p) => p,
                    None => rest.len(),
                };
                let n = span.min(target.len() - out);
                target[out..out + n].copy_from_slice(&rest[..n]);
                out += n;
                cursor += n;
            }
        }
    }
    Ok(cursor)
}

/// Consumes the version 1 end-of-data marker `00 ED ED 00` if present.
pub fn consume_v1_terminator(src: &[u8]) -> bool {
    src.len() >= 4 && src[..4] == [0x00, 0xed, 0xed, 0x00]
}
