//! DRAM controller: per-bank serialized request queue modeling access
//! latency, with write-combining for in-flight update (write-back) traffic.
//!
//! This module only tracks bank occupancy and the pending-access queue; it
//! never touches [`crate::event::EventQueue`] directly (see spec §4.10 and
//! the module-level note on [`crate::event`]). Callers drive scheduling from
//! the [`EnqueueOutcome`]/[`CompleteOutcome`] it returns.

use crate::common::{PhysAddr, Slab, SlabIndex};
use crate::request::RequestHandle;

/// A handle to a queued DRAM access.
pub type DramHandle = SlabIndex;

#[derive(Debug)]
struct PendingAccess {
    addr: PhysAddr,
    request: RequestHandle,
    is_update: bool,
    in_use: bool,
}

/// Parameters for a [`DramController`].
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DramParams {
    /// Number of independently-serialized banks.
    pub banks: usize,
    /// Cycles from a bank access starting to its completion event.
    pub access_latency: u64,
    /// Maximum number of entries the pending queue may hold at once.
    pub queue_capacity: usize,
}

/// Result of [`DramController::enqueue`].
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Absorbed into an existing, not-yet-started update entry for the same
    /// address — no new bank access is needed.
    Merged,
    /// A new entry was admitted to the queue. `should_start` is `true` when
    /// its bank was idle, meaning the caller must schedule a
    /// [`crate::event::EventKind::DramComplete`] for `handle` after
    /// `access_latency` cycles.
    Admitted { handle: DramHandle, should_start: bool },
    /// The pending queue is at capacity; the caller must report
    /// back-pressure to its sender.
    Full,
}

/// Result of [`DramController::complete`].
#[derive(Debug)]
pub struct CompleteOutcome {
    /// The request whose access just finished.
    pub request: RequestHandle,
    /// Whether a response should be sent upward. `Update` (write-back)
    /// accesses are one-way and get no response.
    pub send_response: bool,
    /// The next queued entry for the same bank, if any, now marked in-use —
    /// the caller must schedule its completion event.
    pub next_to_start: Option<DramHandle>,
}

/// Banked memory controller.
#[derive(Debug)]
pub struct DramController {
    bank_busy: Vec<bool>,
    bank_mask: usize,
    access_latency: u64,
    queue_capacity: usize,
    queue: Slab<PendingAccess>,
}

fn bank_of(addr: PhysAddr, bank_mask: usize) -> usize {
    ((addr.val() >> 16) as usize) & bank_mask
}

impl DramController {
    /// Builds a controller with every bank idle. `banks` must be a power of
    /// two.
    #[must_use]
    pub fn new(params: DramParams) -> Self {
        Self {
            bank_busy: vec![false; params.banks],
            bank_mask: params.banks - 1,
            access_latency: params.access_latency,
            queue_capacity: params.queue_capacity,
            queue: Slab::new(),
        }
    }

    /// Cycles from an access starting to its completion.
    #[must_use]
    pub fn access_latency(&self) -> u64 {
        self.access_latency
    }

    /// Admits a request. Update (write-back) requests to an address that
    /// already has a not-yet-started update entry queued are merged rather
    /// than enqueued again, modeling write-combining; this never changes
    /// serialization order for other op types sharing the address.
    pub fn enqueue(&mut self, addr: PhysAddr, request: RequestHandle, is_update: bool) -> EnqueueOutcome {
        if is_update {
            let mergeable = self
                .queue
                .iter()
                .any(|(_, e)| e.addr == addr && e.is_update && !e.in_use);
            if mergeable {
                return EnqueueOutcome::Merged;
            }
        }

        if self.queue.len() >= self.queue_capacity {
            return EnqueueOutcome::Full;
        }

        let bank = bank_of(addr, self.bank_mask);
        let should_start = !self.bank_busy[bank];
        let handle = self.queue.insert(PendingAccess {
            addr,
            request,
            is_update,
            in_use: should_start,
        });
        if should_start {
            self.bank_busy[bank] = true;
        }
        EnqueueOutcome::Admitted { handle, should_start }
    }

    /// Completes the access named by `handle`: frees its slot, frees the
    /// bank, and starts the next queued entry for that bank (if any).
    /// Panics on a stale handle: the caller must already have filtered out
    /// annulled entries before scheduling the completion event.
    pub fn complete(&mut self, handle: DramHandle) -> CompleteOutcome {
        let entry = self
            .queue
            .remove(handle)
            .expect("complete() on a stale or already-freed DRAM entry");
        let bank = bank_of(entry.addr, self.bank_mask);
        self.bank_busy[bank] = false;

        let next_to_start = self
            .queue
            .iter()
            .find(|(_, e)| !e.in_use && bank_of(e.addr, self.bank_mask) == bank)
            .map(|(h, _)| h);

        if let Some(next) = next_to_start {
            let next_entry = self.queue.get_mut(next).expect("handle just found by iter()");
            next_entry.in_use = true;
            self.bank_busy[bank] = true;
        }

        CompleteOutcome {
            request: entry.request,
            send_response: !entry.is_update,
            next_to_start,
        }
    }

    /// Removes every queued entry for `request`, freeing its bank if the
    /// removed entry was in use and had no other same-bank entry to start.
    /// Idempotent: annulling a request with no queued entry is a no-op.
    pub fn annul(&mut self, request: RequestHandle) {
        let targets: Vec<DramHandle> = self
            .queue
            .iter()
            .filter(|(_, e)| e.request == request)
            .map(|(h, _)| h)
            .collect();
        for handle in targets {
            let entry = self.queue.remove(handle).expect("handle from iter() must be live");
            if entry.in_use {
                let bank = bank_of(entry.addr, self.bank_mask);
                self.bank_busy[bank] = false;
            }
        }
    }

    /// Number of accesses currently queued (in use or waiting).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }
}
