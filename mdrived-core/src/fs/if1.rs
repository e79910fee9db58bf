//! Interface 1 file system view.
use std::collections::BTreeMap;

use crate::fs::{File, FileInfo, FsStats};
use crate::record::{Record, IF1_FLAG_USED};
use crate::{Cartridge, Error, Result};

pub(super) fn ls(cart: &Cartridge) -> Result<(FsStats, Vec<FileInfo>)> {
    let mut dir: BTreeMap<String, usize> = BTreeMap::new();
    let mut first_records: BTreeMap<String, (u8, u16)> = BTreeMap::new();
    let mut used = 0;

    for ix in 0..cart.sector_count() {
        let rec = match cart.get_sector_at(ix).and_then(|s| s.record()) {
            Some(r) => r,
            None => continue,
        };
        if rec.flags() & IF1_FLAG_USED == 0 {
            continue;
        }
        used += 1;
        let name = rec.name().trim_end().to_string();
        if name.is_empty() {
            continue;
        }
        *dir.entry(name.clone()).or_insert(0) += rec.length();
        if rec.index() == 0 {
            let file_type = rec.demuxed()[27];
            let line = u16::from_le_bytes([rec.demuxed()[34], rec.demuxed()[35]]);
            first_records.insert(name, (file_type, line));
        }
    }

    let mut files = Vec::with_capacity(dir.len());
    for (name, size) in dir {
        let mut info = FileInfo::new(name.clone(), size);
        if let Some((file_type, line)) = first_records.get(&name) {
            let t = match file_type {
                0 => "BASIC",
                1 | 2 => "array",
                3 => "code",
                _ => "?",
            };
            info.annotations.annotate("file-type", t);
            info.annotations.annotate("line", *line as i64);
        }
        files.push(info);
    }

    Ok((FsStats::new(cart.sector_count(), used), files))
}

pub(super) fn open(cart: &Cartridge, name: &str) -> Result<File> {
    let mut records: Vec<Option<Record>> = Vec::new();
    let mut size = 0;

    for ix in 0..cart.sector_count() {
        let rec = match cart.get_sector_at(ix).and_then(|s| s.record()) {
            Some(r) => r,
            None => continue,
        };
        if rec.flags() & IF1_FLAG_USED == 0 {
            continue;
        }
        if rec.name().trim_end() != name {
            continue;
        }
        if records.len() <= rec.index() {
            records.resize(rec.index() + 1, None);
        }
        size += rec.length();
        records[rec.index()] = Some(rec.clone());
    }

    if records.is_empty() {
        return Err(Error::FileNotFound(name.to_string()));
    }

    Ok(File::new(
        cart.kind(),
        FileInfo::new(name, size),
        records,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::{ClientKind, Header, Sector};
    use std::io::Read;

    // builds a used record with the given file name, record index and
    // payload; record 0 carries a 9-byte BASIC file header
    fn file_record(name: &str, index: usize, payload: &[u8], last: bool) -> Record {
        let kind = ClientKind::If1;
        let mut data = vec![0u8; kind.record_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = if last { 0x06 } else { 0x04 } | IF1_FLAG_USED;
        data[13] = index as u8;
        let len = payload.len() as u16;
        data[14..16].copy_from_slice(&len.to_le_bytes());
        for (i, b) in format!("{:<10}", name).bytes().take(10).enumerate() {
            data[16 + i] = b;
        }
        let body = 27 + if index == 0 { 9 } else { 0 };
        data[body..body + payload.len()].copy_from_slice(payload);
        if index == 0 {
            data[27] = 0x00; // BASIC
            data[34..36].copy_from_slice(&10u16.to_le_bytes());
        }
        let mut r = Record::new(kind, &data, false).unwrap();
        r.fix_checksums().unwrap();
        r
    }

    fn install(cart: &mut Cartridge, slot: usize, number: usize, rec: Record) {
        let h = Header::generate(ClientKind::If1, number, "test").unwrap();
        cart.set_sector_at(slot, Sector::new(Some(h), Some(rec)).unwrap());
    }

    #[test]
    fn ls_groups_by_name() {
        let mut cart = Cartridge::new(ClientKind::If1);
        install(&mut cart, 0, 1, file_record("HELLO", 0, &[0x80; 14], true));
        install(&mut cart, 2, 3, file_record("data", 0, &[1; 100], false));
        install(&mut cart, 4, 5, file_record("data", 1, &[2; 30], true));

        let (stats, files) = ls(&cart).unwrap();
        assert_eq!(stats.sectors(), 254);
        assert_eq!(stats.used(), 3);
        assert_eq!(files.len(), 2);
        let hello = files.iter().find(|f| f.name() == "HELLO").unwrap();
        assert_eq!(hello.size(), 14);
        assert_eq!(hello.annotations.get("file-type").unwrap().as_str(), "BASIC");
        let data = files.iter().find(|f| f.name() == "data").unwrap();
        assert_eq!(data.size(), 130);
    }

    #[test]
    fn open_concatenates_records() {
        let mut cart = Cartridge::new(ClientKind::If1);
        // 503 bytes in record 0 (after the 9-byte header), 47 in record 1
        let part0: Vec<u8> = (0..503u32).map(|i| i as u8).collect();
        let part1: Vec<u8> = (0..47u32).map(|i| (i + 7) as u8).collect();
        install(&mut cart, 0, 1, file_record("f", 0, &part0, false));
        install(&mut cart, 2, 3, file_record("f", 1, &part1, true));

        let mut file = open(&cart, "f").unwrap();
        assert_eq!(file.size(), 550);
        let bytes = File::bytes(&mut file).unwrap();
        assert_eq!(bytes.len(), 550);
        assert_eq!(&bytes[..503], &part0[..]);
        assert_eq!(&bytes[503..], &part1[..]);
    }

    #[test]
    fn open_missing_file() {
        let cart = Cartridge::new(ClientKind::If1);
        assert!(matches!(open(&cart, "nope"), Err(Error::FileNotFound(_))));
    }
}
