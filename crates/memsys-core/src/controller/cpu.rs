//! CPU-side controller (spec §4.4): the front end a core's instruction and
//! data streams issue accesses through before they reach the first coherent
//! cache level.
//!
//! Separate from [`crate::controller::cache::CacheController`] because it
//! tracks per-core/per-thread bookkeeping a coherent level never needs:
//! dedup of two in-flight accesses to the same line from the same core, an
//! I-cache/D-cache split pending count, the 4-cycle-per-entry flush charge,
//! and (when TSX is enabled) the transactional-mode depth per thread.

use std::collections::HashMap;

use crate::common::PhysAddr;
use crate::request::{OpType, RequestHandle};

/// Cycles a single pending-table entry costs to drain on `flush()` (spec
/// §4.4's fixed per-entry flush charge).
pub const FLUSH_CYCLES_PER_ENTRY: u64 = 4;

#[derive(Debug)]
struct PendingAccess {
    request: RequestHandle,
    addr: PhysAddr,
    is_icache: bool,
    /// Other requests from this same core, to the same line, admitted
    /// after this one — they ride this access's response instead of
    /// issuing their own.
    riders: Vec<RequestHandle>,
}

/// Per-thread TSX nesting state. Only the outermost `xbegin` actually opens
/// a hardware transaction; nested ones just bump `depth`, and only the
/// outermost `xend` closes it — mirroring how a TSX implementation folds
/// nested regions into one transaction.
#[derive(Default, Clone, Copy)]
pub struct TsxThreadState {
    depth: u32,
}

impl TsxThreadState {
    /// Whether this thread is currently inside a transactional region.
    #[must_use]
    pub fn in_tsx(self) -> bool {
        self.depth > 0
    }

    /// Enters one nesting level.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Exits one nesting level. Returns `true` if this was the outermost
    /// level and the transaction has now fully committed.
    pub fn end(&mut self) -> bool {
        if self.depth > 0 {
            self.depth -= 1;
        }
        self.depth == 0
    }

    /// Forces the nesting depth to zero (an abort discards every nested
    /// level at once).
    pub fn abort(&mut self) {
        self.depth = 0;
    }
}

/// Result of [`CpuController::access`].
#[derive(Debug)]
pub enum AccessOutcome {
    /// No in-flight access to this line from this core yet; admitted as a
    /// new pending entry. The caller issues it to the first cache level.
    Issue,
    /// An access to the same line from this core is already in flight;
    /// `request` was folded in as a rider and will be woken alongside it.
    Deduped,
    /// The per-core pending table is full.
    Full,
}

/// The CPU-side front end for one core.
#[derive(Debug)]
pub struct CpuController {
    pending: HashMap<PhysAddr, PendingAccess>,
    tsx: HashMap<u32, TsxThreadState>,
    capacity: usize,
    icache_inflight: usize,
    dcache_inflight: usize,
    line_bytes: usize,
}

impl CpuController {
    /// Builds a controller with an empty pending table.
    #[must_use]
    pub fn new(capacity: usize, line_bytes: usize) -> Self {
        Self {
            pending: HashMap::new(),
            tsx: HashMap::new(),
            capacity,
            icache_inflight: 0,
            dcache_inflight: 0,
            line_bytes,
        }
    }

    /// Number of in-flight lines tracked (riders don't count separately).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Admits a new access, deduping against any in-flight access to the
    /// same line from this core.
    pub fn access(&mut self, request: RequestHandle, addr: PhysAddr, is_icache: bool) -> AccessOutcome {
        let line = addr.line_base(self.line_bytes);
        if let Some(existing) = self.pending.get_mut(&line) {
            existing.riders.push(request);
            return AccessOutcome::Deduped;
        }

        if self.pending.len() >= self.capacity {
            return AccessOutcome::Full;
        }

        let _ = self.pending.insert(
            line,
            PendingAccess {
                request,
                addr: line,
                is_icache,
                riders: Vec::new(),
            },
        );
        if is_icache {
            self.icache_inflight += 1;
        } else {
            self.dcache_inflight += 1;
        }
        AccessOutcome::Issue
    }

    /// Completes the in-flight access to `addr`, returning the original
    /// request plus every rider that had deduped against it so the caller
    /// can wake them all. `None` if nothing was pending for that line.
    pub fn handle_response(&mut self, addr: PhysAddr) -> Option<(RequestHandle, Vec<RequestHandle>)> {
        let line = addr.line_base(self.line_bytes);
        let entry = self.pending.remove(&line)?;
        if entry.is_icache {
            self.icache_inflight -= 1;
        } else {
            self.dcache_inflight -= 1;
        }
        Some((entry.request, entry.riders))
    }

    /// Cycles to drain every entry currently in the pending table — a flat
    /// per-entry charge, not modeled down to individual port contention.
    #[must_use]
    pub fn flush_cost(&self) -> u64 {
        self.pending.len() as u64 * FLUSH_CYCLES_PER_ENTRY
    }

    /// Drops every in-flight access without waking anyone (a pipeline
    /// flush discards in-flight loads/fetches).
    pub fn flush(&mut self) {
        self.pending.clear();
        self.icache_inflight = 0;
        self.dcache_inflight = 0;
    }

    /// In-flight instruction-fetch / data accesses, tracked separately so a
    /// flush can report how much of each it drained.
    #[must_use]
    pub fn inflight_counts(&self) -> (usize, usize) {
        (self.icache_inflight, self.dcache_inflight)
    }

    /// This thread's current TSX nesting state.
    pub fn tsx_state(&mut self, thread_id: u32) -> &mut TsxThreadState {
        self.tsx.entry(thread_id).or_default()
    }

    /// Applies a TSX control op (`xbegin`/`xend`/`xabort`) to `thread_id`'s
    /// state. Returns `true` if the transaction is now fully closed
    /// (committed or aborted).
    pub fn apply_tsx_marker(&mut self, thread_id: u32, op: OpType) -> bool {
        let state = self.tsx_state(thread_id);
        match op {
            OpType::Tsx(crate::request::TsxMarker::Begin) => {
                state.begin();
                false
            }
            OpType::Tsx(crate::request::TsxMarker::End) => state.end(),
            OpType::Tsx(crate::request::TsxMarker::Abort) => {
                state.abort();
                true
            }
            _ => state.in_tsx(),
        }
    }
}
