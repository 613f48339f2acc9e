//! Coherent cache controller (spec §4.5): a `CacheLineArray` wrapped in a
//! pending-request table that serializes concurrent accesses to the same
//! line and turns every hit/miss into a [`coherence::Protocol`] call.
//!
//! Like every other component module this is data-only — it never touches
//! [`crate::event::EventQueue`]. `begin_access`/`cache_access`/`cache_hit`/
//! `cache_miss`/`complete_fill` each return an outcome naming the follow-up
//! event [`crate::hierarchy::MemoryHierarchy`] must schedule.

use std::collections::HashMap;

use crate::coherence::{self, tsx, Outcome as CoherenceOutcome, Protocol};
use crate::common::{ControllerId, PhysAddr, Slab, SlabIndex};
use crate::line::{CacheLineArray, LineArrayParams, LineHandle};
use crate::request::{OpType, RequestHandle};

/// A handle to an in-flight access in a [`CacheController`]'s pending table.
pub type PendingHandle = SlabIndex;

#[derive(Debug)]
struct PendingEntry {
    request: RequestHandle,
    addr: PhysAddr,
    op: OpType,
    sender: ControllerId,
    from_interconnect: bool,
    line: Option<LineHandle>,
    waiters: Vec<PendingHandle>,
}

/// Parameters for a [`CacheController`].
#[derive(Clone, Copy)]
pub struct CacheParams {
    /// Line array geometry and port counts.
    pub line: LineArrayParams,
    /// Coherence protocol this controller enforces.
    pub protocol: Protocol,
    /// Whether this is the lowest private cache for its core — only the
    /// lowest private level may claim `E`/`M` directly from a shared hit.
    pub is_lowest_private: bool,
    /// Cycles from an access starting to its hit/miss classification.
    pub access_latency: u64,
    /// Total pending-table slots.
    pub pending_capacity: usize,
    /// Slots reserved within `pending_capacity` for accesses arriving from
    /// the interconnect side (snoops, forwarded requests), so a burst of
    /// local misses can never starve them out.
    pub interconnect_reserve: usize,
    /// Whether the MESI+TSX conflict-tracking overlay is active on this
    /// controller (spec §4.6.3).
    pub tsx_enabled: bool,
}

/// Result of [`CacheController::begin_access`].
#[derive(Debug)]
pub enum BeginOutcome {
    /// A free pending slot was claimed; schedule a `CacheAccess` event for
    /// `pending` after `access_latency` cycles.
    Admitted { pending: PendingHandle },
    /// Another access to the same line is already in flight; `pending` is
    /// queued and will be woken once `ahead_of` completes.
    Queued { pending: PendingHandle, ahead_of: PendingHandle },
    /// The pending table (or the interconnect reservation within it) is
    /// full; the caller must report back-pressure to `sender`.
    Full,
}

/// Result of [`CacheController::cache_access`].
#[derive(Debug)]
pub enum AccessOutcome {
    /// The line was found; schedule `CacheHit` for `pending`.
    Hit,
    /// The line was absent; schedule `CacheMiss` for `pending`.
    Miss,
}

/// Result of [`CacheController::cache_hit`].
#[derive(Debug)]
pub enum HitOutcome {
    /// Satisfy the request now with data, then release the line's lock.
    /// `invalidate_sharers` is set when a MOESI lowest-private write hit
    /// promoted an Owner line to Modified and the directory's other
    /// holders must be invalidated before the caller treats this as final.
    Respond { shared: bool, invalidate_sharers: bool },
    /// Satisfy the request now with no data, then release the line's lock.
    RespondNoData,
    /// The state didn't actually allow this op (a racing snoop invalidated
    /// it between admission and service); treat it as a fresh miss.
    TreatAsMiss,
    /// Forward the op further down unconditionally (an `Update` in transit).
    ForwardDown,
    /// Nothing to send; release the line's lock (an evict of an
    /// already-appropriate-state line).
    Done,
}

/// Result of [`CacheController::cache_miss`].
#[derive(Debug)]
pub enum MissOutcome {
    /// No copy of the line exists here at all (an interconnect miss);
    /// respond with no data and release the lock.
    RespondNoData,
    /// An `Update` (write-back) passing through a level that does not hold
    /// the target line itself; forwarded on unconditionally, no victim
    /// selection performed.
    PassThrough,
    /// A victim line was selected (possibly evicting `evicted`, which was
    /// dirty iff `evicted_dirty`) and the original request must be
    /// forwarded further down.
    Forward { evicted: Option<PhysAddr>, evicted_dirty: bool },
}

/// Result of [`CacheController::complete_fill`].
pub struct CompleteOutcome {
    /// The request whose miss just got its data back.
    pub request: RequestHandle,
    /// Every pending access that had queued behind this line and can now
    /// be retried (the caller schedules `CacheAccess` for each).
    pub woken: Vec<PendingHandle>,
}

/// A coherent cache level.
#[derive(Debug)]
pub struct CacheController {
    lines: CacheLineArray,
    pending: Slab<PendingEntry>,
    locks: HashMap<PhysAddr, PendingHandle>,
    protocol: Protocol,
    is_lowest_private: bool,
    access_latency: u64,
    pending_capacity: usize,
    interconnect_reserve: usize,
    num_sets: usize,
    tsx_enabled: bool,
    /// The thread id of the most recently locally-marked TSX access. The
    /// overlay bits in [`crate::line`] carry no thread tag, so this
    /// controller tracks at most one active transaction at a time — the
    /// common one-transaction-per-core case.
    tsx_thread: Option<u32>,
}

impl CacheController {
    /// Builds an empty controller.
    #[must_use]
    pub fn new(params: CacheParams) -> Self {
        Self {
            lines: CacheLineArray::new(params.line),
            pending: Slab::new(),
            locks: HashMap::new(),
            protocol: params.protocol,
            is_lowest_private: params.is_lowest_private,
            access_latency: params.access_latency,
            pending_capacity: params.pending_capacity,
            interconnect_reserve: params.interconnect_reserve,
            num_sets: params.line.num_sets,
            tsx_enabled: params.tsx_enabled,
            tsx_thread: None,
        }
    }

    /// Cycles from an access starting to its hit/miss classification.
    #[must_use]
    pub fn access_latency(&self) -> u64 {
        self.access_latency
    }

    /// The coherence protocol this controller enforces.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether this is the lowest private cache for its core.
    #[must_use]
    pub fn is_lowest_private(&self) -> bool {
        self.is_lowest_private
    }

    /// The thread id a live local TSX reservation on this controller is
    /// tagged with, if any.
    #[must_use]
    pub fn tsx_active_thread(&self) -> Option<u32> {
        self.tsx_thread
    }

    fn line_bytes(&self) -> usize {
        self.lines.line_bytes()
    }

    fn interconnect_pending_count(&self) -> usize {
        self.pending.iter().filter(|(_, e)| e.from_interconnect).count()
    }

    /// Admits a new access into the pending table, or reports back-pressure.
    pub fn begin_access(
        &mut self,
        request: RequestHandle,
        addr: PhysAddr,
        op: OpType,
        sender: ControllerId,
        from_interconnect: bool,
    ) -> BeginOutcome {
        if from_interconnect && self.interconnect_pending_count() >= self.interconnect_reserve {
            return BeginOutcome::Full;
        }
        if self.pending.len() >= self.pending_capacity {
            return BeginOutcome::Full;
        }

        let line_addr = addr.line_base(self.line_bytes());
        let entry = PendingEntry {
            request,
            addr: line_addr,
            op,
            sender,
            from_interconnect,
            line: None,
            waiters: Vec::new(),
        };
        let pending = self.pending.insert(entry);

        if let Some(&holder) = self.locks.get(&line_addr) {
            self.pending
                .get_mut(holder)
                .expect("lock holder must still be pending")
                .waiters
                .push(pending);
            BeginOutcome::Queued { pending, ahead_of: holder }
        } else {
            let _ = self.locks.insert(line_addr, pending);
            BeginOutcome::Admitted { pending }
        }
    }

    /// Classifies `pending` as a hit or miss against the line array.
    pub fn cache_access(&mut self, now: u64, pending: PendingHandle) -> AccessOutcome {
        let addr = self.pending.get(pending).expect("stale pending handle").addr;
        match self.lines.probe(now, addr) {
            Some(handle) => {
                self.pending.get_mut(pending).expect("checked above").line = Some(handle);
                AccessOutcome::Hit
            }
            None => AccessOutcome::Miss,
        }
    }

    /// Services a classified hit. `thread_id`/`tsx_active` describe whose
    /// reservation this access should be checked/tagged against; for a
    /// snoop, the caller passes the cache's own locally-tagged thread, not
    /// the snoop's originating thread, since the reservation lives here.
    /// Returns a TSX conflict for the caller to report, if this hit broke
    /// one.
    pub fn cache_hit(
        &mut self,
        pending: PendingHandle,
        thread_id: u32,
        tsx_active: bool,
    ) -> (HitOutcome, Option<(tsx::Conflict, u32)>) {
        let entry = self.pending.get(pending).expect("stale pending handle");
        let line = entry.line.expect("cache_hit without a prior cache_access hit");
        let op = entry.op;
        let from_interconnect = entry.from_interconnect;

        let state = self.lines.state(line);
        let conflict = if from_interconnect && self.tsx_enabled {
            tsx::check_snoop(state, op.is_write(), tsx_active).map(|c| (c, self.tsx_thread.unwrap_or(thread_id)))
        } else {
            None
        };

        let (new_state, outcome) = if from_interconnect {
            self.protocol.handle_interconn_hit(state, op, self.is_lowest_private)
        } else {
            self.protocol.handle_local_hit(state, op, self.is_lowest_private)
        };

        let invalidate_sharers = matches!(self.protocol, Protocol::Moesi)
            && !from_interconnect
            && op == OpType::Write
            && coherence::base_state(state) == coherence::O
            && self.is_lowest_private
            && new_state == coherence::M;

        let overlay_state = if self.tsx_enabled && !from_interconnect {
            match op {
                OpType::Write => tsx::mark_write(new_state),
                OpType::Read => tsx::mark_read(new_state),
                _ => new_state,
            }
        } else if conflict.is_some() {
            tsx::clear(new_state)
        } else {
            new_state
        };
        self.lines.set_state(line, overlay_state);

        if self.tsx_enabled && !from_interconnect && matches!(op, OpType::Read | OpType::Write) {
            self.tsx_thread = Some(thread_id);
        }

        let hit_outcome = match outcome {
            CoherenceOutcome::Respond { shared } => {
                let _ = self.release(pending);
                HitOutcome::Respond { shared, invalidate_sharers }
            }
            CoherenceOutcome::RespondNoData => {
                let _ = self.release(pending);
                HitOutcome::RespondNoData
            }
            CoherenceOutcome::TreatAsMiss => HitOutcome::TreatAsMiss,
            CoherenceOutcome::ForwardDown => HitOutcome::ForwardDown,
            CoherenceOutcome::NoOp => {
                let _ = self.release(pending);
                HitOutcome::Done
            }
        };
        (hit_outcome, conflict)
    }

    /// Services a classified miss: selects a victim line (unless this is
    /// purely an interconnect probe of a line this cache never held, or a
    /// write-back passing through a level that never cached the target
    /// line at all). Returns a TSX conflict for the caller to report if
    /// evicting the victim broke an open transaction's reservation.
    pub fn cache_miss(
        &mut self,
        now: u64,
        pending: PendingHandle,
        thread_id: u32,
        tsx_active: bool,
    ) -> (MissOutcome, Option<(tsx::Conflict, u32)>) {
        let entry = self.pending.get(pending).expect("stale pending handle");
        if entry.from_interconnect {
            let _ = self.release(pending);
            return (MissOutcome::RespondNoData, None);
        }
        if entry.op == OpType::Update {
            let _ = self.release(pending);
            return (MissOutcome::PassThrough, None);
        }

        let addr = entry.addr;
        let line_bytes = self.line_bytes();
        let (set, _tag) = crate::common::addr::set_and_tag(addr, line_bytes, self.num_sets);
        let (line, evicted_tag) = self.lines.select(now, addr);
        let old_state = self.lines.state(line);
        let evicted_dirty = evicted_tag.is_some() && coherence::is_dirty(old_state);
        let conflict = if self.tsx_enabled {
            tsx::check_eviction(old_state, tsx_active).map(|c| (c, self.tsx_thread.unwrap_or(thread_id)))
        } else {
            None
        };
        self.lines.set_state(line, coherence::I);
        self.pending.get_mut(pending).expect("checked above").line = Some(line);

        let evicted = evicted_tag.map(|tag| {
            PhysAddr::new(crate::common::addr::line_addr_from_set_tag(set, tag, line_bytes, self.num_sets))
        });
        (MissOutcome::Forward { evicted, evicted_dirty }, conflict)
    }

    /// Finalizes a miss once the fill response arrives: installs the final
    /// coherence state and releases every access that had queued behind
    /// this line.
    pub fn complete_fill(&mut self, pending: PendingHandle, response_is_shared: bool) -> CompleteOutcome {
        let entry = self.pending.get(pending).expect("stale pending handle");
        let line = entry.line.expect("complete_fill without a selected line");
        let op = entry.op;
        let request = entry.request;

        let state = self.protocol.complete_request(op, response_is_shared, self.is_lowest_private);
        self.lines.set_state(line, state);

        let woken = self.release(pending);
        CompleteOutcome { request, woken }
    }

    /// Releases `pending`'s line lock, promoting its first waiter (if any)
    /// to lock holder and returning every waiter so the caller can
    /// re-schedule their `CacheAccess` events.
    fn release(&mut self, pending: PendingHandle) -> Vec<PendingHandle> {
        let entry = self.pending.remove(pending).expect("release of a stale pending handle");
        if let Some(&holder) = self.locks.get(&entry.addr) {
            if holder == pending {
                let _ = self.locks.remove(&entry.addr);
                if let Some(&next) = entry.waiters.first() {
                    let _ = self.locks.insert(entry.addr, next);
                }
            }
        }
        entry.waiters
    }

    /// Removes `pending` from the table without running its coherence
    /// effects, for an annulled in-flight access. Repairs the lock chain
    /// the same way a normal completion would.
    pub fn annul(&mut self, pending: PendingHandle) -> Vec<PendingHandle> {
        self.release(pending)
    }

    /// The request, address, op, and origin a still-pending access
    /// concerns, for response routing by a caller that needs them before
    /// an outcome method consumes (releases) the entry.
    #[must_use]
    pub fn pending_snapshot(&self, pending: PendingHandle) -> Option<(RequestHandle, PhysAddr, OpType, bool)> {
        self.pending.get(pending).map(|e| (e.request, e.addr, e.op, e.from_interconnect))
    }

    /// Current coherence state of the line covering `addr`, if cached here.
    #[must_use]
    pub fn peek_state(&self, addr: PhysAddr) -> Option<u8> {
        let handle = self.lines.peek(addr)?;
        Some(self.lines.state(handle))
    }

    /// Number of accesses currently in the pending table.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
