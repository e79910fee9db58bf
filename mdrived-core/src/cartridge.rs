//! The cartridge: a circular array of sector slots.
use log::{error, trace};

use crate::annotations::Annotations;
use crate::{ClientKind, Sector};

/// An in-memory tape cartridge.
///
/// Slots are ordered such that front-to-back iteration corresponds to
/// reverse physical tape order, matching the way the adapter streams
/// tape-head motion: advancing the access index decrements it modulo the
/// slot count, rewinding increments it.
#[derive(Debug, Clone)]
pub struct Cartridge {
    kind: ClientKind,
    name: String,
    sectors: Vec<Option<Sector>>,
    access_ix: usize,
    write_protected: bool,
    modified: bool,
    autosaved: bool,
    annotations: Annotations,
}

impl Cartridge {
    /// Creates a blank, unformatted cartridge.
    pub fn new(kind: ClientKind) -> Self {
        let count = kind.sector_count();
        Cartridge {
            kind,
            name: String::new(),
            sectors: vec![None; count],
            access_ix: count - 1,
            write_protected: false,
            modified: false,
            autosaved: false,
            annotations: Annotations::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// The cartridge name, derived from the first named sector installed.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// A cartridge is formatted iff at least one slot is non-empty.
    pub fn is_formatted(&self) -> bool {
        self.sectors.iter().any(Option::is_some)
    }

    #[inline]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
        if modified {
            self.autosaved = false;
        }
    }

    #[inline]
    pub fn is_autosaved(&self) -> bool {
        self.autosaved
    }

    pub fn set_autosaved(&mut self, autosaved: bool) {
        self.autosaved = autosaved;
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }

    #[inline]
    pub fn access_ix(&self) -> usize {
        self.access_ix
    }

    /// Positions the access index one step back of the slot holding the
    /// highest numbered sector, so that the next advance returns it. A no-op
    /// on unformatted cartridges.
    pub fn seek_to_start(&mut self) {
        let mut max = 0;
        let mut max_ix = None;
        for (ix, sec) in self.sectors.iter().enumerate() {
            if let Some(s) = sec {
                if s.index() > max {
                    max = s.index();
                    max_ix = Some(ix);
                }
            }
        }
        if let Some(ix) = max_ix {
            self.access_ix = ix;
            self.rewind_access_ix(false);
        }
    }

    /// Advances the access index, optionally skipping empty slots, and
    /// returns the new index. With `skip_empty` set this is a no-op on an
    /// unformatted cartridge.
    pub fn advance_access_ix(&mut self, skip_empty: bool) -> usize {
        self.move_access_ix(true, skip_empty)
    }

    /// The inverse of [Cartridge::advance_access_ix].
    pub fn rewind_access_ix(&mut self, skip_empty: bool) -> usize {
        self.move_access_ix(false, skip_empty)
    }

    fn move_access_ix(&mut self, forward: bool, skip_empty: bool) -> usize {
        let from = self.access_ix;
        if !skip_empty || self.is_formatted() {
            loop {
                let count = self.sector_count() as isize;
                let next = if forward {
                    self.access_ix as isize - 1
                } else {
                    self.access_ix as isize + 1
                };
                self.access_ix = next.rem_euclid(count) as usize;
                if !skip_empty || self.sectors[self.access_ix].is_some() {
                    break;
                }
            }
        }
        trace!("moving access ix {} -> {}", from, self.access_ix);
        self.access_ix
    }

    /// The sector at the next access index, skipping empty slots. The access
    /// index points at the returned sector's slot afterwards.
    pub fn get_next_sector(&mut self) -> Option<&Sector> {
        let ix = self.advance_access_ix(true);
        self.sectors[ix].as_ref()
    }

    /// The sector at the previous access index, skipping empty slots.
    pub fn get_previous_sector(&mut self) -> Option<&Sector> {
        let ix = self.rewind_access_ix(true);
        self.sectors[ix].as_ref()
    }

    pub fn get_sector_at(&self, ix: usize) -> Option<&Sector> {
        self.sectors.get(ix).and_then(Option::as_ref)
    }

    pub fn sector_at_mut(&mut self, ix: usize) -> Option<&mut Sector> {
        self.sectors.get_mut(ix).and_then(Option::as_mut)
    }

    /// Sets a sector at the next access index, present or not.
    pub fn set_next_sector(&mut self, sector: Sector) {
        let ix = self.advance_access_ix(false);
        self.set_sector_at(ix, sector);
    }

    /// Installs a sector at the given slot, adopting its name for the
    /// cartridge and marking the cartridge modified.
    pub fn set_sector_at(&mut self, ix: usize, sector: Sector) {
        if ix >= self.sector_count() {
            error!("trying to set sector at invalid index {}", ix);
            return;
        }
        let name = sector.name();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self.sectors[ix] = Some(sector);
        self.set_modified(true);
    }

    /// Removes and returns the sector at the given slot.
    pub fn take_sector_at(&mut self, ix: usize) -> Option<Sector> {
        self.sectors.get_mut(ix).and_then(Option::take)
    }

    /// Iterates populated slots in physical slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Sector)> {
        self.sectors
            .iter()
            .enumerate()
            .filter_map(|(ix, s)| s.as_ref().map(|sec| (ix, sec)))
    }

    /// Number of populated slots.
    pub fn used(&self) -> usize {
        self.sectors.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Record, Sector};

    fn sector(kind: ClientKind, number: usize, name: &str) -> Sector {
        let h = Header::generate(kind, number, name).unwrap();
        let r = Record::generate(kind).unwrap();
        Sector::new(Some(h), Some(r)).unwrap()
    }

    #[test]
    fn blank_is_unformatted() {
        let cart = Cartridge::new(ClientKind::If1);
        assert!(!cart.is_formatted());
        assert_eq!(cart.sector_count(), 254);
        assert_eq!(cart.access_ix(), 253);
    }

    #[test]
    fn full_revolution_visits_every_slot_once() {
        let mut cart = Cartridge::new(ClientKind::If1);
        let count = cart.sector_count();
        let mut seen = vec![false; count];
        for _ in 0..count {
            let ix = cart.advance_access_ix(false);
            assert!(!seen[ix]);
            seen[ix] = true;
        }
        assert!(seen.iter().all(|&v| v));
        assert_eq!(cart.access_ix(), count - 1);
    }

    #[test]
    fn advance_and_rewind_are_inverse() {
        let mut cart = Cartridge::new(ClientKind::Ql);
        let start = cart.access_ix();
        cart.advance_access_ix(false);
        cart.rewind_access_ix(false);
        assert_eq!(cart.access_ix(), start);
    }

    #[test]
    fn skip_empty_on_blank_cartridge_is_noop() {
        let mut cart = Cartridge::new(ClientKind::If1);
        let start = cart.access_ix();
        assert_eq!(cart.advance_access_ix(true), start);
        assert_eq!(cart.rewind_access_ix(true), start);
    }

    #[test]
    fn seek_to_start_finds_top_sector() {
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_sector_at(10, sector(ClientKind::If1, 11, "cart"));
        cart.set_sector_at(100, sector(ClientKind::If1, 101, "cart"));
        cart.seek_to_start();
        let next = cart.get_next_sector().unwrap();
        assert_eq!(next.index(), 101);
    }

    #[test]
    fn modified_clears_autosaved() {
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_autosaved(true);
        cart.set_sector_at(0, sector(ClientKind::If1, 1, "x"));
        assert!(cart.is_modified());
        assert!(!cart.is_autosaved());
    }

    #[test]
    fn adopts_first_sector_name() {
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_sector_at(3, sector(ClientKind::If1, 4, "games"));
        assert_eq!(cart.name(), "games     ");
    }

    #[test]
    fn skip_empty_walks_to_populated_slot() {
        let mut cart = Cartridge::new(ClientKind::If1);
        cart.set_sector_at(5, sector(ClientKind::If1, 6, "x"));
        cart.set_sector_at(20, sector(ClientKind::If1, 21, "x"));
        // installing does not move the access index
        assert_eq!(cart.access_ix(), 253);
        let s = cart.get_next_sector().unwrap();
        assert_eq!(s.index(), 21);
        let s = cart.get_next_sector().unwrap();
        assert_eq!(s.index(), 6);
        let s = cart.get_next_sector().unwrap();
        assert_eq!(s.index(), 21);
    }
}
