//! QL file system view.
//!
//! A distinguished sector 0 carries the sector map: one `(file number,
//! block number)` pair per physical sector. Files are reconstructed by
//! scanning the map for all slots of a file number.
use std::collections::BTreeMap;

use log::warn;

use crate::fs::{File, FileInfo, FsStats};
use crate::record::{Record, QL_FLAG_FREE, QL_RESERVED_FLAGS};
use crate::{Cartridge, Error, Result};

// both flag values are observed in the wild for the map sector
const MAP_FLAGS: [u8; 2] = [0xf8, 0x80];

pub(super) fn ls(cart: &Cartridge) -> Result<(FsStats, Vec<FileInfo>)> {
    let mut dir: BTreeMap<String, usize> = BTreeMap::new();
    let mut used = 0;

    for ix in 0..cart.sector_count() {
        let rec = match cart.get_sector_at(ix).and_then(|s| s.record()) {
            Some(r) => r,
            None => continue,
        };
        if rec.flags() != QL_FLAG_FREE {
            used += 1;
        }
        if rec.flags() >= QL_RESERVED_FLAGS || rec.index() > 0 {
            continue;
        }
        let name = rec.name();
        if name.is_empty() {
            continue;
        }
        dir.insert(name, rec.length());
    }

    let files = dir
        .into_iter()
        .map(|(name, size)| FileInfo::new(name, size))
        .collect();

    Ok((FsStats::new(cart.sector_count(), used), files))
}

pub(super) fn open(cart: &Cartridge, name: &str) -> Result<File> {
    // physical sector number -> slot index
    let mut index: BTreeMap<usize, usize> = BTreeMap::new();
    let mut zero: Option<&Record> = None;
    let mut first: Option<&Record> = None;

    for ix in 0..cart.sector_count() {
        let sec = match cart.get_sector_at(ix) {
            Some(s) => s,
            None => continue,
        };
        index.insert(sec.index(), ix);
        let rec = match sec.record() {
            Some(r) => r,
            None => continue,
        };
        if sec.index() == 0 && MAP_FLAGS.contains(&rec.flags()) {
            if rec.flags() == 0x80 {
                warn!("sector map with file number 0x80, expected 0xf8");
            }
            if zero.is_some() {
                return Err(Error::FileSystem("more than one zero block found".into()));
            }
            zero = Some(rec);
            continue;
        }
        if rec.flags() >= QL_RESERVED_FLAGS || rec.index() > 0 || rec.name() != name {
            continue;
        }
        if first.is_some() {
            return Err(Error::FileSystem("more than one first block found".into()));
        }
        first = Some(rec);
    }

    let zero = zero.ok_or_else(|| Error::FileSystem("zero block not found".into()))?;
    let first = first.ok_or_else(|| Error::FileNotFound(name.to_string()))?;

    let map = SectorMap::new(zero)?;
    let records = map.collect_file_records(cart, &index, first.flags())?;

    Ok(File::new(
        cart.kind(),
        FileInfo::new(name, first.length()),
        records,
    ))
}

struct SectorMap<'a> {
    entries: &'a [u8],
}

impl<'a> SectorMap<'a> {
    fn new(zero: &'a Record) -> Result<Self> {
        let entries = zero.data();
        // the map sector maps itself as file 0xf8, block 0
        if entries[0] != 0xf8 || entries[1] != 0x00 {
            return Err(Error::FileSystem("not a sector map".into()));
        }
        Ok(SectorMap { entries })
    }

    fn entry(&self, sector: usize) -> Option<(u8, u8)> {
        if 2 * sector + 1 < self.entries.len() {
            Some((self.entries[2 * sector], self.entries[2 * sector + 1]))
        } else {
            None
        }
    }

    fn collect_file_records(
        &self,
        cart: &Cartridge,
        index: &BTreeMap<usize, usize>,
        number: u8,
    ) -> Result<Vec<Option<Record>>> {
        let mut records: Vec<Option<Record>> = Vec::new();

        for s in 0..cart.sector_count() {
            let (f_num, r_num) = match self.entry(s) {
                Some(e) => e,
                None => break,
            };
            if f_num != number {
                continue;
            }
            let r_num = r_num as usize;
            if records.len() <= r_num {
                records.resize(r_num + 1, None);
            }
            let slot = *index
                .get(&s)
                .ok_or_else(|| Error::FileSystem(format!("sector not found: {}", s)))?;
            let rec = cart
                .get_sector_at(slot)
                .and_then(|sec| sec.record())
                .ok_or_else(|| Error::FileSystem(format!("no record in sector: {}", s)))?;
            records[r_num] = Some(rec.clone());
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::{ClientKind, Header, Sector};

    fn ql_record(file: u8, block: u8, fill: impl FnOnce(&mut [u8])) -> Record {
        let kind = ClientKind::Ql;
        let mut data = vec![0u8; kind.record_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = file;
        data[13] = block;
        fill(&mut data[16..528]);
        let mut r = Record::new(kind, &data, false).unwrap();
        r.fix_checksums().unwrap();
        r
    }

    fn install(cart: &mut Cartridge, number: usize, rec: Record) {
        let h = Header::generate(ClientKind::Ql, number, "ql").unwrap();
        let slot = ClientKind::Ql.sector_slot(number);
        cart.set_sector_at(slot, Sector::new(Some(h), Some(rec)).unwrap());
    }

    fn map_record(assign: &[(usize, u8, u8)]) -> Record {
        ql_record(0xf8, 0, |data| {
            for e in data.iter_mut() {
                *e = 0xfd; // free
            }
            data[0] = 0xf8;
            data[1] = 0x00;
            for &(sector, file, block) in assign {
                data[2 * sector] = file;
                data[2 * sector + 1] = block;
            }
        })
    }

    fn file_zero_block(file: u8, name: &str, total: usize, payload: &[u8]) -> Record {
        ql_record(file, 0, |data| {
            data[0..4].copy_from_slice(&(total as u32).to_be_bytes());
            data[14..16].copy_from_slice(&(name.len() as u16).to_be_bytes());
            data[16..16 + name.len()].copy_from_slice(name.as_bytes());
            data[64..64 + payload.len()].copy_from_slice(payload);
        })
    }

    #[test]
    fn ls_and_open_via_sector_map() {
        let mut cart = Cartridge::new(ClientKind::Ql);
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        install(&mut cart, 0, map_record(&[(3, 1, 0)]));
        install(&mut cart, 3, file_zero_block(1, "boot", 64 + 200, &payload));

        let (stats, files) = ls(&cart).unwrap();
        assert_eq!(stats.sectors(), 255);
        // the map sector and the file block; empty slots are not used
        assert_eq!(stats.used(), 2);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), "boot");
        assert_eq!(files[0].size(), 200);

        let mut f = open(&cart, "boot").unwrap();
        assert_eq!(f.bytes().unwrap(), payload);
    }

    #[test]
    fn blank_cartridge_lists_empty() {
        let cart = Cartridge::new(ClientKind::Ql);
        let (stats, files) = ls(&cart).unwrap();
        assert_eq!(stats.used(), 0);
        assert!(files.is_empty());
    }

    #[test]
    fn free_sectors_are_not_used() {
        let mut cart = Cartridge::new(ClientKind::Ql);
        install(&mut cart, 0, map_record(&[]));
        install(&mut cart, 5, ql_record(0xfd, 0, |_| {}));
        let (stats, _) = ls(&cart).unwrap();
        assert_eq!(stats.used(), 1); // only the map sector
    }

    #[test]
    fn permissive_map_flags() {
        let mut cart = Cartridge::new(ClientKind::Ql);
        let map = ql_record(0x80, 0, |data| {
            for e in data.iter_mut() {
                *e = 0xfd;
            }
            data[0] = 0xf8;
            data[1] = 0x00;
            data[2] = 1;
            data[3] = 0;
        });
        install(&mut cart, 0, map);
        install(&mut cart, 1, file_zero_block(1, "x", 64 + 3, &[1, 2, 3]));
        let mut f = open(&cart, "x").unwrap();
        assert_eq!(f.bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn missing_map_is_an_error() {
        let mut cart = Cartridge::new(ClientKind::Ql);
        install(&mut cart, 1, file_zero_block(1, "x", 64, &[]));
        assert!(matches!(open(&cart, "x"), Err(Error::FileSystem(_))));
    }
}
