//! End to end scenarios against the daemon core.
use mdrived::daemon::{Daemon, DaemonError, DRIVE_COUNT};
use mdrived::repo::RepoIndex;

use mdrived_core::{codec, fs, Cartridge, ClientKind, Header, Record, Sector};
use mdrived_formats::{Format, Params};

const KIND: ClientKind = ClientKind::If1;

/// A cartridge holding one BASIC file "HELLO" of 14 bytes, all other
/// sectors formatted blank.
fn hello_cartridge() -> Cartridge {
    let mut cart = Cartridge::new(KIND);
    cart.set_name("demo      ");

    for slot in 0..cart.sector_count() {
        let hd = Header::generate(KIND, slot + 1, "demo").unwrap();
        let rec = if slot == 100 {
            let mut data = vec![0u8; KIND.record_len()];
            codec::copy_sync_pattern(&mut data);
            data[12] = 0x07; // used, end of file
            data[13] = 0x00;
            data[14..16].copy_from_slice(&14u16.to_le_bytes());
            data[16..26].copy_from_slice(b"HELLO     ");
            data[27] = 0x00; // BASIC
            data[28..30].copy_from_slice(&14u16.to_le_bytes());
            data[30..32].copy_from_slice(&23813u16.to_le_bytes());
            data[32..34].copy_from_slice(&14u16.to_le_bytes());
            data[34..36].copy_from_slice(&0u16.to_le_bytes());
            for (i, b) in data[36..50].iter_mut().enumerate() {
                *b = i as u8;
            }
            let mut rec = Record::new(KIND, &data, false).unwrap();
            rec.fix_checksums().unwrap();
            rec
        } else {
            Record::generate(KIND).unwrap()
        };
        cart.set_sector_at(slot, Sector::new(Some(hd), Some(rec)).unwrap());
    }
    cart
}

#[test]
fn empty_daemon_start() {
    let daemon = Daemon::new(KIND, None);
    daemon.load_cartridges();

    for drive in 1..=DRIVE_COUNT {
        let (guard, locked) = daemon.get_cartridge(drive);
        assert!(locked);
        assert!(!guard.unwrap().is_formatted());
    }
    assert!(daemon.hardware_drives().is_off());
}

#[test]
fn load_mdr_then_list() {
    // write the fixture through the mdr format and load it back
    let mut fixture = hello_cartridge();
    let mut image = Vec::new();
    Format::Mdr.write(&mut fixture, &mut image).unwrap();

    let cart = Format::Mdr
        .read(&mut &image[..], true, false, &Params::default())
        .unwrap();

    let daemon = Daemon::new(KIND, None);
    daemon.load_cartridges();
    daemon.set_cartridge(1, cart, false).unwrap();

    let (guard, _) = daemon.get_cartridge(1);
    let guard = guard.unwrap();
    let (stats, files) = fs::ls(&guard).unwrap();
    assert_eq!(stats.sectors(), 254);
    assert_eq!(stats.used(), 1);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name(), "HELLO");
    assert_eq!(files[0].size(), 14);
    assert_eq!(
        files[0].annotations.get("file-type").unwrap().as_str(),
        "BASIC"
    );
}

#[test]
fn conflicting_load_needs_force() {
    let daemon = Daemon::new(KIND, None);
    daemon.load_cartridges();

    {
        let (guard, _) = daemon.get_cartridge(1);
        guard.unwrap().set_modified(true);
    }

    // second load refused while the first is unsaved
    let err = daemon
        .set_cartridge(1, hello_cartridge(), false)
        .unwrap_err();
    assert!(matches!(err, DaemonError::Conflict(1)));

    daemon.set_cartridge(1, hello_cartridge(), true).unwrap();
}

#[test]
fn z80_snapshot_to_playable_cartridge() {
    let mut snap = vec![0u8; 30];
    snap[7] = 0x80; // PC 0x8000, marks a version 1 snapshot
    snap[8] = 0x00;
    snap[9] = 0xff; // SP 0xff00
    snap[12] = 0x02; // border 1, uncompressed
    let mut memory = vec![0u8; 49152];
    for (i, b) in memory[10000..20000].iter_mut().enumerate() {
        *b = (i % 253) as u8;
    }
    snap.extend_from_slice(&memory);

    let cart = Format::Z80
        .read(
            &mut &snap[..],
            true,
            false,
            &Params {
                name: "jet-set-willy".into(),
                launcher: "hidden".into(),
            },
        )
        .unwrap();

    assert!(!cart.is_modified());
    let (_, files) = fs::ls(&cart).unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["0", "M", "run"]);

    // the packed cartridge serializes as a regular mdr image
    let mut cart = cart;
    let mut image = Vec::new();
    Format::Z80.write(&mut cart, &mut image).unwrap();
    assert_eq!(image.len(), 254 * 543 + 1);
}

#[test]
fn repo_search_scenario() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("games")).unwrap();
    std::fs::create_dir_all(dir.path().join("docs")).unwrap();
    std::fs::File::create(dir.path().join("games/elite.mdr")).unwrap();
    std::fs::File::create(dir.path().join("games/chuckie.mdr.gz")).unwrap();
    std::fs::File::create(dir.path().join("docs/readme.txt")).unwrap();

    let index = RepoIndex::new(dir.path());
    index.start();

    let res = index.search("elite", 25).unwrap();
    assert_eq!(res.hits, vec!["games/elite.mdr".to_string()]);
    assert_eq!(res.total, 1);
    assert!(res.complete);
    index.stop();
}
