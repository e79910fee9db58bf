/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    mdrived is free software: you can redistribute it and/or modify it
    under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    mdrived is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with mdrived. If not, see <http://www.gnu.org/licenses/>.
*/
//! Cartridge file formats for the mdrived Microdrive emulator.
//!
//! Symmetric formats read and write cartridge images (`.mdr` for the
//! Interface 1, `.mdv` for the QL). The Z80 format is asymmetric: it reads
//! Z80 or SNA memory snapshots and produces playable Interface 1
//! cartridges, see the [z80] module.
use std::io::{Read, Write};

use mdrived_core::Cartridge;

pub mod helper;
pub mod mdr;
pub mod mdv;
pub mod reader;
pub mod z80;

pub use reader::{split_name_type_compressor, CartReader};

/// Errors produced while reading or writing cartridges.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] mdrived_core::Error),
    #[error("{0}")]
    Corrupt(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Capacity(String),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parameters passed through from the load request to a format reader.
#[derive(Debug, Clone, Default)]
pub struct Params {
    /// Cartridge name, e.g. for freshly packed snapshots.
    pub name: String,
    /// Launcher style for the snapshot packer.
    pub launcher: String,
}

/// A cartridge file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mdr,
    Mdv,
    Z80,
    Sna,
}

impl Format {
    /// Resolves a format from its type string.
    pub fn from_type(typ: &str) -> Result<Format> {
        match typ {
            "mdr" => Ok(Format::Mdr),
            "mdv" => Ok(Format::Mdv),
            "z80" => Ok(Format::Z80),
            "sna" => Ok(Format::Sna),
            other => Err(Error::Unsupported(format!(
                "unsupported cartridge type: '{}'",
                other
            ))),
        }
    }

    /// Reads a cartridge from `input`.
    pub fn read(
        &self,
        input: &mut dyn Read,
        strict: bool,
        repair: bool,
        params: &Params,
    ) -> Result<Cartridge> {
        match self {
            Format::Mdr => mdr::read(input, strict, repair),
            Format::Mdv => mdv::read(input, strict, repair),
            Format::Z80 | Format::Sna => {
                let mut cart = z80::load(
                    input,
                    &params.name,
                    &params.launcher,
                    *self == Format::Sna,
                )?;
                if repair {
                    helper::repair_order(&mut cart);
                }
                cart.set_modified(false);
                cart.seek_to_start();
                cart.rewind_access_ix(true);
                Ok(cart)
            }
        }
    }

    /// Writes a cartridge to `out`. Snapshot formats serialize as `.mdr`.
    pub fn write(&self, cart: &mut Cartridge, out: &mut dyn Write) -> Result<()> {
        match self {
            Format::Mdr | Format::Z80 | Format::Sna => mdr::write(cart, out),
            Format::Mdv => mdv::write(cart, out),
        }
    }
}
