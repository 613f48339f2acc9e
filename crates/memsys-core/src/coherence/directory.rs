//! MOESI sharer directory: tracks which controllers hold a copy of a line
//! without every controller having to broadcast-snoop every other one
//! (spec §3, "Directory entry (MOESI only)").
//!
//! Entries are installed lazily on first access to a line and removed once
//! the last sharer drops it, rather than pre-allocated per address; the
//! directory controller that owns a [`Directory`] is responsible for
//! picking the entry's home (spec §4.5's controller module list names a
//! `DirectoryController` alongside the coherent cache controller).

use std::collections::HashMap;

use crate::common::{ControllerId, PhysAddr};

/// One line's sharer/owner bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct DirectoryEntry {
    /// Every controller presently holding a readable copy.
    pub sharers: Vec<ControllerId>,
    /// The controller holding the line dirty (MOESI `O`/`M`), if any.
    pub owner: Option<ControllerId>,
    /// True while a coherence transaction against this line is in flight;
    /// a second request for the same line must wait rather than racing it.
    pub locked: bool,
}

impl DirectoryEntry {
    fn is_empty(&self) -> bool {
        self.sharers.is_empty() && self.owner.is_none()
    }
}

/// A lazily-populated map from physical line address to [`DirectoryEntry`].
#[derive(Default, Debug)]
pub struct Directory {
    entries: HashMap<PhysAddr, DirectoryEntry>,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads an entry without installing one.
    #[must_use]
    pub fn get(&self, addr: PhysAddr) -> Option<&DirectoryEntry> {
        self.entries.get(&addr)
    }

    /// Records `controller` as a new read-only sharer of `addr`, installing
    /// an entry on first access.
    pub fn add_sharer(&mut self, addr: PhysAddr, controller: ControllerId) {
        let entry = self.entries.entry(addr).or_default();
        if !entry.sharers.contains(&controller) {
            entry.sharers.push(controller);
        }
    }

    /// Records `controller` as the dirty owner of `addr`, clearing any
    /// other sharers (a write grant always invalidates every other copy
    /// first; the caller is responsible for actually sending those
    /// invalidations before calling this).
    pub fn set_owner(&mut self, addr: PhysAddr, controller: ControllerId) {
        let entry = self.entries.entry(addr).or_default();
        entry.sharers.clear();
        entry.owner = Some(controller);
    }

    /// Returns every controller that must be invalidated for `controller`
    /// to become the sole owner of `addr`: every current sharer and owner
    /// other than itself.
    #[must_use]
    pub fn other_holders(&self, addr: PhysAddr, controller: ControllerId) -> Vec<ControllerId> {
        let Some(entry) = self.entries.get(&addr) else {
            return Vec::new();
        };
        entry
            .sharers
            .iter()
            .copied()
            .chain(entry.owner)
            .filter(|&c| c != controller)
            .collect()
    }

    /// Drops `controller` from `addr`'s sharer/owner record, removing the
    /// entry entirely once no one holds the line. Idempotent.
    pub fn remove_holder(&mut self, addr: PhysAddr, controller: ControllerId) {
        let Some(entry) = self.entries.get_mut(&addr) else {
            return;
        };
        entry.sharers.retain(|&c| c != controller);
        if entry.owner == Some(controller) {
            entry.owner = None;
        }
        if entry.is_empty() {
            let _ = self.entries.remove(&addr);
        }
    }

    /// Locks `addr`'s entry against concurrent transactions, installing one
    /// if absent. Returns `false` if it was already locked.
    pub fn try_lock(&mut self, addr: PhysAddr) -> bool {
        let entry = self.entries.entry(addr).or_default();
        if entry.locked {
            false
        } else {
            entry.locked = true;
            true
        }
    }

    /// Unlocks `addr`'s entry, removing it if it's left holding nothing.
    pub fn unlock(&mut self, addr: PhysAddr) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.locked = false;
            if entry.is_empty() {
                let _ = self.entries.remove(&addr);
            }
        }
    }
}
