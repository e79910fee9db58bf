/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! Transparent decompression of cartridge input streams.
use std::io::Read;

use flate2::read::GzDecoder;
use log::debug;

use crate::{Error, Result};

/// Wraps a cartridge input stream, undoing a `.gz` wrapper when asked, and
/// carries whatever name/type information the wrapper provides.
pub struct CartReader {
    inner: Box<dyn Read>,
    name: String,
    typ: String,
    compressor: String,
}

impl CartReader {
    pub fn new(input: Box<dyn Read>, compressor: &str) -> Result<CartReader> {
        debug!("cartridge reader requested: compressor '{}'", compressor);
        match compressor {
            "gzip" | "gz" => {
                let gz = GzDecoder::new(input);
                let mut name = String::new();
                let mut typ = String::new();
                if let Some(header) = gz.header() {
                    if let Some(fname) = header.filename() {
                        let n = String::from_utf8_lossy(fname).to_string();
                        let (n, t, _) = split_name_type_compressor(&n);
                        name = n;
                        typ = t;
                    }
                }
                Ok(CartReader {
                    inner: Box::new(gz),
                    name,
                    typ,
                    compressor: "gzip".to_string(),
                })
            }
            "" => Ok(CartReader {
                inner: input,
                name: String::new(),
                typ: String::new(),
                compressor: String::new(),
            }),
            other => Err(Error::Unsupported(format!(
                "unsupported compressor: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> &str {
        &self.typ
    }

    pub fn compressor(&self) -> &str {
        &self.compressor
    }
}

impl Read for CartReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Splits a file name into base name, cartridge type and compressor,
/// peeling off extensions from the right.
pub fn split_name_type_compressor(file: &str) -> (String, String, String) {
    let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
    let mut name = base;
    let mut typ = String::new();
    let mut compressor = String::new();

    loop {
        match name.rsplit_once('.') {
            Some((stem, ext)) => {
                let ext = ext.to_ascii_lowercase();
                match ext.as_str() {
                    "mdr" | "mdv" | "z80" | "sna" => typ = ext,
                    "gz" | "gzip" => compressor = ext,
                    _ => {
                        break;
                    }
                }
                name = stem;
            }
            None => break,
        }
    }
    (name.to_string(), typ, compressor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn splits_names() {
        assert_eq!(
            split_name_type_compressor("games/elite.mdr.gz"),
            ("elite".into(), "mdr".into(), "gz".into())
        );
        assert_eq!(
            split_name_type_compressor("jet-set-willy.z80"),
            ("jet-set-willy".into(), "z80".into(), "".into())
        );
        assert_eq!(
            split_name_type_compressor("readme.txt"),
            ("readme.txt".into(), "".into(), "".into())
        );
        assert_eq!(
            split_name_type_compressor("boot.mdv"),
            ("boot".into(), "mdv".into(), "".into())
        );
    }

    #[test]
    fn unwraps_gzip() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"payload bytes").unwrap();
        let packed = gz.finish().unwrap();

        let mut rd = CartReader::new(Box::new(std::io::Cursor::new(packed)), "gz").unwrap();
        let mut out = Vec::new();
        rd.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload bytes");
        assert_eq!(rd.compressor(), "gzip");
    }

    #[test]
    fn passthrough() {
        let mut rd = CartReader::new(Box::new(&b"raw"[..]), "").unwrap();
        let mut out = Vec::new();
        rd.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"raw");
    }

    #[test]
    fn rejects_unknown_compressor() {
        assert!(CartReader::new(Box::new(&b""[..]), "7z").is_err());
    }
}
