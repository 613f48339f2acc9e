//! `MemoryRequest`: the unit of work flowing through the hierarchy.
//!
//! Requests live in a [`Slab`] owned by [`crate::hierarchy::MemoryHierarchy`]
//! rather than behind a reference-counted smart pointer. Every holder (a
//! pending-request entry, a controller queue slot, a scheduled event) calls
//! [`RequestPool::hold`] / [`RequestPool::release`] around the span it keeps
//! the handle live; the slot is freed the moment the count returns to zero.
//! This is the arena+generation scheme the design notes prefer over
//! intrusive refcounting: a stale [`RequestHandle`] is rejected by the slab
//! rather than silently aliasing a recycled request.

use crate::common::{PhysAddr, Slab, SlabIndex};

/// A handle to a live [`MemoryRequest`] in a [`RequestPool`].
pub type RequestHandle = SlabIndex;

/// The kind of memory operation a request represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    /// A load.
    Read,
    /// A store.
    Write,
    /// A write-back / update carrying dirty data toward memory.
    Update,
    /// A notification that a line has been dropped from a cache.
    Evict,
    /// A TSX region-control marker (`xbegin`/`xend`/`xabort`); see
    /// [`crate::request::TsxMarker`] for which one.
    Tsx(TsxMarker),
}

/// Which TSX control operation a [`OpType::Tsx`] request represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsxMarker {
    /// Enter a transactional region; `abort_pc` names the fallback path.
    Begin,
    /// Commit the transactional region (only the outer-most nesting level
    /// actually commits).
    End,
    /// Explicitly abort the transactional region.
    Abort,
}

impl OpType {
    /// Requests that, when satisfied, carry data back to the requester
    /// (as opposed to `Update`/`Evict`, which are one-way notifications).
    #[must_use]
    pub fn expects_response_data(self) -> bool {
        matches!(self, OpType::Read | OpType::Write)
    }

    /// Whether this op mutates the target line's coherence state toward
    /// exclusive ownership.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, OpType::Write)
    }
}

/// A memory request descriptor. Carries only metadata — address, op type,
/// origin, and timing — never payload bytes, per the core's non-goals.
#[derive(Clone, Debug)]
pub struct MemoryRequest {
    /// Target physical address.
    pub addr: PhysAddr,
    /// Operation kind.
    pub op: OpType,
    /// Originating core id.
    pub core_id: u32,
    /// Originating thread id (for per-thread TLB/TSX tagging).
    pub thread_id: u32,
    /// Reorder-buffer slot id; identifies the request within its producer's
    /// in-flight window for wakeup/annul matching.
    pub rob_id: u32,
    /// A monotonically increasing producer-assigned sequence number, used
    /// only as a debug trail (the "owner-uuid" of spec §3).
    pub uuid: u64,
    /// Simulated cycle the request was issued at.
    pub issued_at: u64,
    /// True for instruction fetches, false for data accesses.
    pub is_icache: bool,
    /// True if the access was made while the producer was in kernel/
    /// supervisor mode.
    pub is_kernel: bool,
    refs: u32,
}

impl MemoryRequest {
    /// Current reference count. Exposed for invariant assertions and tests;
    /// production code should never branch on this directly — hold/release
    /// through [`RequestPool`] instead.
    #[must_use]
    pub fn refs(&self) -> u32 {
        self.refs
    }
}

/// Parameters for allocating a new request, mirroring the `access_cache`
/// entry point's argument list (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct RequestSpec {
    /// Target physical address.
    pub addr: PhysAddr,
    /// Operation kind.
    pub op: OpType,
    /// Originating core id.
    pub core_id: u32,
    /// Originating thread id.
    pub thread_id: u32,
    /// Reorder-buffer slot id.
    pub rob_id: u32,
    /// Producer-assigned debug uuid.
    pub uuid: u64,
    /// Simulated issue cycle.
    pub issued_at: u64,
    /// Instruction vs. data access.
    pub is_icache: bool,
    /// Kernel vs. user mode access.
    pub is_kernel: bool,
}

/// The fixed arena of in-flight [`MemoryRequest`]s.
#[derive(Default)]
pub struct RequestPool {
    slab: Slab<MemoryRequest>,
}

impl RequestPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self { slab: Slab::new() }
    }

    /// Allocates a request with reference count 1 (the caller's own hold).
    pub fn allocate(&mut self, spec: RequestSpec) -> RequestHandle {
        self.slab.insert(MemoryRequest {
            addr: spec.addr,
            op: spec.op,
            core_id: spec.core_id,
            thread_id: spec.thread_id,
            rob_id: spec.rob_id,
            uuid: spec.uuid,
            issued_at: spec.issued_at,
            is_icache: spec.is_icache,
            is_kernel: spec.is_kernel,
            refs: 1,
        })
    }

    /// Borrows the request's fields.
    #[must_use]
    pub fn get(&self, handle: RequestHandle) -> Option<&MemoryRequest> {
        self.slab.get(handle)
    }

    /// Increments the reference count for a new holder of `handle`. Panics
    /// in debug builds if the handle is stale — holding a dead request is
    /// always a controller bug, never an expected runtime condition.
    pub fn hold(&mut self, handle: RequestHandle) {
        if let Some(req) = self.slab.get_mut(handle) {
            req.refs += 1;
        } else {
            debug_assert!(false, "hold() on a stale or freed request handle");
        }
    }

    /// Releases one holder's reference. Returns `true` if this was the last
    /// reference and the slot was freed back to the pool.
    pub fn release(&mut self, handle: RequestHandle) -> bool {
        let Some(req) = self.slab.get_mut(handle) else {
            debug_assert!(false, "release() on a stale or freed request handle");
            return false;
        };
        debug_assert!(req.refs > 0, "refcount underflow on release()");
        req.refs -= 1;
        if req.refs == 0 {
            let _ = self.slab.remove(handle);
            true
        } else {
            false
        }
    }

    /// Number of requests currently live in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// True if no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Iterates over every live request, handle first.
    pub fn iter(&self) -> impl Iterator<Item = (RequestHandle, &MemoryRequest)> {
        self.slab.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(addr: u64) -> RequestSpec {
        RequestSpec {
            addr: PhysAddr::new(addr),
            op: OpType::Read,
            core_id: 0,
            thread_id: 0,
            rob_id: 0,
            uuid: 1,
            issued_at: 0,
            is_icache: false,
            is_kernel: false,
        }
    }

    #[test]
    fn refcount_conservation() {
        let mut pool = RequestPool::new();
        let h = pool.allocate(spec(0x1000));
        assert_eq!(pool.get(h).unwrap().refs(), 1);

        pool.hold(h);
        pool.hold(h);
        assert_eq!(pool.get(h).unwrap().refs(), 3);

        assert!(!pool.release(h));
        assert!(!pool.release(h));
        assert!(pool.release(h), "last release frees the slot");
        assert!(pool.get(h).is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn stale_handle_after_free_is_rejected() {
        let mut pool = RequestPool::new();
        let h1 = pool.allocate(spec(0x1000));
        pool.release(h1);
        let h2 = pool.allocate(spec(0x2000));
        assert!(pool.get(h1).is_none());
        assert_eq!(pool.get(h2).unwrap().addr, PhysAddr::new(0x2000));
    }
}
