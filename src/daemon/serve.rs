//! The serial command loop.
//!
//! One OS thread owns the conduit and processes commands synchronously:
//! every PUT completes before the next command is decoded. Any decode or
//! dispatch error drops sync, unlocks all held cartridges and resets the
//! most-recently-used pairing; a receive error additionally reopens the
//! port with exponential backoff.
use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use mdrived_core::annotations::{
    HEALTH_HEADERS_BAD, HEALTH_RECORDS_BAD, HEALTH_SECTORS, HEALTH_SECTORS_BAD, TOP_SECTOR,
};
use mdrived_core::{
    lock_cartridge, CartGuard, Cartridge, Header, Mru, Record, Sector, LOCK_TIMEOUT,
    START_LOCK_TIMEOUT,
};
use mdrived_formats::helper;

use crate::conduit::{Command, Conduit, Op, DAEMON_GREETING, HEADER_SIZE_LIMIT};
use crate::daemon::{Daemon, DriveState};

const MAX_BACKOFF: Duration = Duration::from_secs(15);

fn invalid(e: impl Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Runs the serial protocol against the adapter on `device`. Never
/// returns; all errors feed the retry and resync machinery.
pub struct SerialLoop {
    daemon: Arc<Daemon>,
    device: String,
    conduit: Option<Conduit>,
    mru: Mru,
    synced: bool,
    held: HashMap<usize, CartGuard>,
}

impl SerialLoop {
    pub fn new(daemon: Arc<Daemon>, device: String) -> SerialLoop {
        SerialLoop {
            daemon,
            device,
            conduit: None,
            mru: Mru::new(),
            synced: false,
            held: HashMap::new(),
        }
    }

    pub fn run(mut self) {
        self.daemon.load_cartridges();
        self.reset_conduit();

        loop {
            if !self.synced {
                match self.conduit_mut().sync_on_hello() {
                    Ok(info) => {
                        self.synced = true;
                        self.daemon.set_adapter_info(Some(info));
                        self.held.clear();
                        self.mru.reset();
                        info!("in sync with adapter");
                    }
                    Err(e) => {
                        error!("error syncing with adapter: {}", e);
                        self.mru.reset();
                        self.reset_conduit();
                    }
                }
                continue;
            }

            match self.conduit_mut().receive_command() {
                Err(e) => {
                    error!("error receiving command: {}", e);
                    self.drop_sync();
                    self.reset_conduit();
                }
                Ok(cmd) => {
                    if let Err(e) = self.dispatch(cmd) {
                        error!("error dispatching command: {}", e);
                        self.drop_sync();
                    }
                }
            }
        }
    }

    fn conduit_mut(&mut self) -> &mut Conduit {
        // reset_conduit only ever returns with an open conduit
        match self.conduit.as_mut() {
            Some(c) => c,
            None => unreachable!("conduit not open"),
        }
    }

    fn drop_sync(&mut self) {
        self.synced = false;
        self.held.clear();
        self.mru.reset();
    }

    /// Closes and reopens the serial port, backing off exponentially from
    /// one second up to fifteen.
    fn reset_conduit(&mut self) {
        self.synced = false;
        if self.conduit.take().is_some() {
            info!("closing serial port {}", self.device);
            self.daemon.set_writer(None);
            self.daemon.set_adapter_info(None);
        }

        info!("opening serial port {}", self.device);
        let mut backoff = Duration::from_secs(1);
        let mut quiet = false;
        loop {
            match Conduit::open(&self.device, self.daemon.client()) {
                Ok(con) => {
                    info!("serial port {} opened", self.device);
                    self.daemon.set_writer(Some(con.shared_writer()));
                    self.conduit = Some(con);
                    return;
                }
                Err(e) => {
                    if !quiet {
                        warn!("cannot open serial port {}: {}", self.device, e);
                    }
                    if backoff < MAX_BACKOFF {
                        backoff *= 2;
                    } else if !quiet {
                        warn!("repeatedly failed to open serial port, will keep trying quietly");
                        quiet = true;
                    }
                    std::thread::sleep(backoff);
                }
            }
        }
    }

    fn dispatch(&mut self, cmd: Command) -> io::Result<()> {
        match cmd.op {
            Op::Hello => self.hello(),
            Op::Status => self.status(cmd),
            Op::Get => self.get(cmd),
            Op::Put => self.put(cmd),
            Op::Cancel => self.cancel(cmd),
            Op::Map => self.map(cmd),
            Op::Config => self.config(cmd),
            Op::Debug => self.debug(cmd),
        }
    }

    /// Runs `f` against the drive's cartridge, using the lock held since
    /// drive start if there is one, otherwise locking transiently.
    fn with_cartridge<T>(
        &mut self,
        drive: usize,
        f: impl FnOnce(&mut Cartridge) -> T,
    ) -> Option<T> {
        if let Some(guard) = self.held.get_mut(&drive) {
            return Some(f(guard));
        }
        let cart = self.daemon.slot(drive)?;
        let mut guard = lock_cartridge(&cart, LOCK_TIMEOUT)?;
        Some(f(&mut guard))
    }

    fn hello(&mut self) -> io::Result<()> {
        debug!("HELLO while synced, greeting again");
        self.held.clear();
        self.mru.reset();
        self.conduit_mut().send(DAEMON_GREETING)
    }

    /*
        STATUS, arg 0: drive number, arg 1: action, 1 for drive start,
        0 for drive stop.

        On start, the reply is a single state byte (bit 0 loaded, bit 1
        formatted, bit 2 read-only, bit 7 error/busy), and the cartridge is
        locked with a short timeout; a busy cartridge just reports as such.
        On stop, the cartridge is auto-saved if modified and unlocked;
        while shadowing, missing sectors are synthesized first.
    */
    fn status(&mut self, cmd: Command) -> io::Result<()> {
        let drive = cmd.drive()?;
        self.mru.reset();

        if cmd.arg(1) == 1 {
            let state = match self.daemon.slot(drive) {
                None => {
                    warn!("STATUS start, drive {} empty", drive);
                    DriveState::default()
                }
                Some(cart) => match lock_cartridge(&cart, START_LOCK_TIMEOUT) {
                    None => {
                        debug!("STATUS start, drive {} busy", drive);
                        DriveState::ERROR
                    }
                    Some(guard) => {
                        let mut state = DriveState::LOADED;
                        state.set(DriveState::FORMATTED, guard.is_formatted());
                        state.set(DriveState::READONLY, guard.is_write_protected());
                        self.held.insert(drive, guard);
                        state
                    }
                },
            };
            info!("STATUS started, drive {}, state {:#04x}", drive, state.bits());
            return self.conduit_mut().send(&[state.bits()]);
        }

        info!("STATUS stopped, drive {}", drive);
        let shadowed = self.daemon.is_shadowing() && self.daemon.is_hardware_drive(drive);
        let autosave = self.daemon.autosave_dir().map(|d| d.to_path_buf());

        match self.held.remove(&drive) {
            Some(mut guard) => {
                if shadowed {
                    synthesize_missing_sectors(&mut guard);
                }
                if let Some(dir) = autosave {
                    if let Err(e) = helper::auto_save(drive, &mut guard, &dir) {
                        error!("auto-saving drive {} failed: {}", drive, e);
                    }
                }
            }
            None => {
                warn!("STATUS stop without held lock on drive {}", drive);
                self.with_cartridge(drive, |cart| {
                    if shadowed {
                        synthesize_missing_sectors(cart);
                    }
                    if let Some(dir) = autosave {
                        if let Err(e) = helper::auto_save(drive, cart, &dir) {
                            error!("auto-saving drive {} failed: {}", drive, e);
                        }
                    }
                });
            }
        }
        Ok(())
    }

    /// Streams the cartridge to the adapter: every populated sector in
    /// access order, muxed header then muxed record, preambles included.
    fn get(&mut self, cmd: Command) -> io::Result<()> {
        let drive = cmd.drive()?;
        let out = self.with_cartridge(drive, |cart| {
            let mut out = Vec::new();
            cart.seek_to_start();
            for _ in 0..cart.sector_count() {
                let ix = cart.advance_access_ix(false);
                if let Some(sec) = cart.get_sector_at(ix) {
                    if let Some(h) = sec.header() {
                        out.extend_from_slice(h.muxed());
                    }
                    if let Some(r) = sec.record() {
                        out.extend_from_slice(r.muxed());
                    }
                }
            }
            out
        });
        match out {
            Some(data) => {
                debug!("GET drive {}: {} bytes", drive, data.len());
                self.conduit_mut().send(&data)
            }
            None => Err(invalid(format!("GET: no cartridge in drive {}", drive))),
        }
    }

    /*
        PUT sends sections (header or record) to the daemon.

        Variable length (arg 1 = 0): arg 2 is 0 to go ahead, 1 to abort;
        the conduit infers the length from the initial bytes. Requires
        highly reliable data, so it is forbidden on hardware drives.

        Fixed length (arg 1 = length high byte + 1, arg 2 = low byte): used
        during shadowing, where the data is unreliable. The final byte of
        the received section is a rejection code, 0 to accept, 1 for too
        short, 2 for too long.
    */
    fn put(&mut self, cmd: Command) -> io::Result<()> {
        let drive = cmd.drive()?;
        if cmd.arg(1) == 0 {
            self.put_variable_length(drive, cmd)
        } else {
            self.put_fixed_length(drive, cmd)
        }
    }

    fn put_variable_length(&mut self, drive: usize, cmd: Command) -> io::Result<()> {
        if cmd.arg(2) != 0 {
            debug!("PUT aborted, drive {}, code {}", drive, cmd.arg(2));
            return Ok(());
        }
        if self.daemon.is_hardware_drive(drive) {
            return Err(invalid("must not use variable length PUT during shadowing"));
        }

        let client = self.conduit_mut().client();
        let data = self.conduit_mut().receive_block()?;

        if data.len() < HEADER_SIZE_LIMIT {
            let mut hd = Header::new(client, &data, true).map_err(invalid)?;
            hd.validate().map_err(invalid)?;
            self.mru.set_header(hd);
        } else {
            let mut rec = Record::new(client, &data, true).map_err(invalid)?;
            rec.validate().map_err(invalid)?;
            self.mru.set_record(rec.clone());

            if self.mru.is_record_update() {
                let index = match self.mru.header() {
                    Some(h) => h.index(),
                    None => return Err(invalid("record update without header")),
                };
                let slot = client.sector_slot(index);
                self.with_cartridge(drive, |cart| {
                    if let Some(sec) = cart.sector_at_mut(slot) {
                        sec.set_record(rec);
                    }
                    cart.set_modified(true);
                    debug!("PUT record, drive {}, sector {}", drive, index);
                })
                .ok_or_else(|| invalid("error updating record: no cartridge"))?;
                self.mru.reset();
                return Ok(());
            }
        }

        if self.mru.is_new_sector() {
            let sec = self.mru.take_sector().map_err(invalid)?;
            let index = sec.index();
            self.with_cartridge(drive, |cart| {
                cart.set_next_sector(sec);
                debug!("PUT sector complete, drive {}, sector {}", drive, index);
            })
            .ok_or_else(|| invalid("error creating sector: no cartridge"))?;
        }
        Ok(())
    }

    fn put_fixed_length(&mut self, drive: usize, cmd: Command) -> io::Result<()> {
        if !self.daemon.is_hardware_drive(drive) {
            return Err(invalid("only use fixed length PUT during shadowing"));
        }

        // the adapter omits the preamble to save bandwidth
        let len = (cmd.arg(1) as usize - 1) * 256 + cmd.arg(2) as usize + 12;
        let mut data = vec![0u8; len];
        let pre = self.conduit_mut().fill_preamble(&mut data);
        self.conduit_mut().receive(&mut data[pre..])?;

        let code = data[data.len() - 1];
        if code != 0 {
            debug!("PUT rejected, drive {}, code {}", drive, code);
            self.mru.reset();
            return Ok(());
        }
        data.pop();

        let client = self.conduit_mut().client();
        if data.len() < HEADER_SIZE_LIMIT {
            match Header::new(client, &data, true) {
                Ok(hd) => {
                    if let Some(e) = hd.validation_error() {
                        warn!("received corrupt header: {}", e);
                    }
                    debug!("set header, sector {}", hd.index());
                    self.mru.reset();
                    self.mru.set_header(hd);
                }
                Err(e) => {
                    warn!("error creating header: {}", e);
                    self.mru.reset();
                    return Ok(());
                }
            }
        } else {
            match Record::new(client, &data, true) {
                Ok(rec) => {
                    if let Some(e) = rec.validation_error() {
                        warn!("received corrupt record: {}", e);
                    }
                    debug!("set record");
                    self.mru.set_record(rec);
                }
                Err(e) => {
                    warn!("error creating record: {}", e);
                    self.mru.reset();
                    return Ok(());
                }
            }
        }

        if self.mru.is_new_sector() {
            let sec = self.mru.take_sector().map_err(invalid)?;
            let index = sec.index();
            let slot = client.sector_slot(index);
            self.with_cartridge(drive, |cart| {
                install_shadow_sector(cart, slot, index, sec);
            })
            .ok_or_else(|| invalid("error creating sector: no cartridge"))?;
        }
        Ok(())
    }

    fn cancel(&mut self, cmd: Command) -> io::Result<()> {
        let drive = cmd.drive()?;
        debug!("CANCEL, drive {}, code {}", drive, cmd.arg(1));
        self.mru.reset();
        Ok(())
    }

    fn map(&mut self, cmd: Command) -> io::Result<()> {
        self.daemon
            .apply_map(cmd.arg(0) as usize, cmd.arg(1) as usize, cmd.arg(2));
        Ok(())
    }

    fn config(&mut self, cmd: Command) -> io::Result<()> {
        info!(
            "CONFIG from adapter: item {}, values {}/{}",
            cmd.arg(0),
            cmd.arg(1),
            cmd.arg(2)
        );
        Ok(())
    }

    fn debug(&mut self, cmd: Command) -> io::Result<()> {
        debug!(
            "DEBUG from adapter: {} {} {}",
            cmd.arg(0),
            cmd.arg(1),
            cmd.arg(2)
        );
        Ok(())
    }
}

/// Installs a sector received while shadowing. Existing sections are only
/// amended when they carry a validation error; valid data is preserved.
fn install_shadow_sector(cart: &mut Cartridge, slot: usize, index: usize, sec: Sector) {
    if cart.get_sector_at(slot).is_some() {
        let mut amended_header = false;
        let mut amended_record = false;
        if let Some(present) = cart.sector_at_mut(slot) {
            if present
                .header()
                .map(|h| h.validation_error().is_some())
                .unwrap_or(true)
            {
                if let Some(h) = sec.header() {
                    present.set_header(h.clone());
                    amended_header = true;
                }
            }
            if present
                .record()
                .map(|r| r.validation_error().is_some())
                .unwrap_or(true)
            {
                if let Some(r) = sec.record() {
                    present.set_record(r.clone());
                    amended_record = true;
                }
            }
        }
        if amended_header {
            shadow_annotate(cart, slot, Some(HEALTH_HEADERS_BAD));
            debug!("PUT header amended, sector {}", index);
        }
        if amended_record {
            shadow_annotate(cart, slot, Some(HEALTH_RECORDS_BAD));
            debug!("PUT record amended, sector {}", index);
        }
    } else {
        cart.set_sector_at(slot, sec);
        shadow_annotate(cart, slot, None);
        let top = cart.annotations().int(TOP_SECTOR);
        cart.annotations_mut()
            .annotate(TOP_SECTOR, top.max(index as i64));
        debug!("PUT sector complete, sector {}", index);
    }
}

/// Health annotation bookkeeping for shadow installs and amendments.
fn shadow_annotate(cart: &mut Cartridge, slot: usize, amended: Option<&str>) {
    let (header_bad, record_bad) = match cart.get_sector_at(slot) {
        Some(sec) => (
            sec.header().and_then(Header::validation_error).is_some(),
            sec.record().and_then(Record::validation_error).is_some(),
        ),
        None => (false, false),
    };

    let annotations = cart.annotations_mut();
    match amended {
        None => {
            annotations.adjust(HEALTH_SECTORS, 1);
            if header_bad {
                annotations.adjust(HEALTH_HEADERS_BAD, 1);
            }
            if record_bad {
                annotations.adjust(HEALTH_RECORDS_BAD, 1);
            }
            if header_bad || record_bad {
                annotations.adjust(HEALTH_SECTORS_BAD, 1);
            }
        }
        Some(key) => {
            annotations.adjust(key, -1);
            if !header_bad && !record_bad {
                annotations.adjust(HEALTH_SECTORS_BAD, -1);
            }
        }
    }
    cart.set_modified(true);
}

/// Fills every empty slot with a generated sector when a shadowed drive
/// stops. Slots beyond the highest index seen from the hardware cannot
/// contain real data and are marked accordingly.
fn synthesize_missing_sectors(cart: &mut Cartridge) {
    let top = cart.annotations().int(TOP_SECTOR) as usize;
    let name = cart.name().trim_end().to_string();
    let kind = cart.kind();

    for ix in 0..cart.sector_count() {
        if cart.get_sector_at(ix).is_some() {
            continue;
        }
        let number = kind.slot_sector(ix);
        let generated = Header::generate(kind, number, &name)
            .and_then(|mut hd| {
                let mut rec = Record::generate(kind)?;
                if number > top {
                    hd.invalidate("could not shadow");
                    rec.invalidate("could not shadow");
                }
                Sector::new(Some(hd), Some(rec))
            });
        match generated {
            Ok(sec) => {
                cart.set_sector_at(ix, sec);
                debug!("generated missing sector at index {}", ix);
            }
            Err(e) => error!("failed to generate missing sector at {}: {}", ix, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrived_core::codec;
    use mdrived_core::ClientKind;

    const KIND: ClientKind = ClientKind::If1;

    fn valid_record(number: u8) -> Record {
        let mut data = vec![0u8; KIND.record_len()];
        codec::copy_sync_pattern(&mut data);
        data[12] = 0x05;
        data[13] = number;
        let mut rec = Record::new(KIND, &data, false).unwrap();
        rec.fix_checksums().unwrap();
        rec
    }

    fn corrupt_record() -> Record {
        let mut rec = valid_record(0);
        let mut data = rec.demuxed().to_vec();
        data[100] ^= 0xff; // break the data checksum
        rec = Record::new(KIND, &data, false).unwrap();
        assert!(rec.validation_error().is_some());
        rec
    }

    fn shadow_sector(number: usize, rec: Record) -> Sector {
        let hd = Header::generate(KIND, number, "shadow").unwrap();
        Sector::new(Some(hd), Some(rec)).unwrap()
    }

    #[test]
    fn shadow_amend_keeps_valid_record() {
        let mut cart = Cartridge::new(KIND);
        let slot = KIND.sector_slot(5);

        // a valid sector arrives
        install_shadow_sector(&mut cart, slot, 5, shadow_sector(5, valid_record(0)));
        assert_eq!(cart.annotations().int(HEALTH_SECTORS), 1);
        assert_eq!(cart.annotations().int(HEALTH_RECORDS_BAD), 0);
        let original = cart.get_sector_at(slot).unwrap().record().unwrap().clone();

        // a corrupt record for the same sector must not replace it
        install_shadow_sector(&mut cart, slot, 5, shadow_sector(5, corrupt_record()));
        assert_eq!(
            cart.get_sector_at(slot).unwrap().record().unwrap(),
            &original
        );
    }

    #[test]
    fn shadow_amend_replaces_corrupt_record() {
        let mut cart = Cartridge::new(KIND);
        let slot = KIND.sector_slot(7);

        install_shadow_sector(&mut cart, slot, 7, shadow_sector(7, corrupt_record()));
        assert_eq!(cart.annotations().int(HEALTH_RECORDS_BAD), 1);
        assert_eq!(cart.annotations().int(HEALTH_SECTORS_BAD), 1);

        // a valid record amends the sector and heals the annotations
        install_shadow_sector(&mut cart, slot, 7, shadow_sector(7, valid_record(0)));
        assert_eq!(cart.annotations().int(HEALTH_RECORDS_BAD), 0);
        assert_eq!(cart.annotations().int(HEALTH_SECTORS_BAD), 0);
        assert!(cart
            .get_sector_at(slot)
            .unwrap()
            .record()
            .unwrap()
            .validation_error()
            .is_none());
    }

    #[test]
    fn top_sector_tracks_maximum() {
        let mut cart = Cartridge::new(KIND);
        install_shadow_sector(
            &mut cart,
            KIND.sector_slot(9),
            9,
            shadow_sector(9, valid_record(0)),
        );
        assert_eq!(cart.annotations().int(TOP_SECTOR), 9);
        install_shadow_sector(
            &mut cart,
            KIND.sector_slot(3),
            3,
            shadow_sector(3, valid_record(0)),
        );
        assert_eq!(cart.annotations().int(TOP_SECTOR), 9);
    }

    #[test]
    fn synthesis_invalidates_beyond_top_sector() {
        let mut cart = Cartridge::new(KIND);
        install_shadow_sector(
            &mut cart,
            KIND.sector_slot(10),
            10,
            shadow_sector(10, valid_record(0)),
        );
        synthesize_missing_sectors(&mut cart);
        assert_eq!(cart.used(), cart.sector_count());

        // within the shadowed range: valid; beyond it: marked unusable
        let below = cart.get_sector_at(KIND.sector_slot(5)).unwrap();
        assert!(below.validation_error().is_none());
        let beyond = cart.get_sector_at(KIND.sector_slot(200)).unwrap();
        assert_eq!(beyond.validation_error(), Some("could not shadow"));
    }
}
