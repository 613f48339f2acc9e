//! The event queue: the simulator's only mechanism for advancing time.
//!
//! An [`Event`] is a `(callback, fire_cycle, argument)` triple (spec §4.1).
//! The "callback" here is a `(ComponentId, EventKind)` pair rather than a
//! function pointer or a name looked up in a signal table — the design
//! notes call for a tagged variant dispatched through a single switch, which
//! is what [`crate::hierarchy::MemoryHierarchy::dispatch`] does. This module
//! only implements the scheduling data structure and the zero-delay
//! short-circuit; it knows nothing about caches, buses, or DRAM.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::common::ComponentId;

/// Which callback a scheduled [`Event`] should invoke on its target
/// component. Every interconnect/controller/DRAM variant from spec §4 has
/// exactly one entry here; the facade's `dispatch` matches on
/// `(target, kind)` to find the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Coherent cache controller: meter a port and classify hit/miss.
    CacheAccess,
    /// Coherent cache controller: local/interconnect hit path.
    CacheHit,
    /// Coherent cache controller: local/interconnect miss path.
    CacheMiss,
    /// Coherent cache controller: emit the pending entry's message,
    /// retrying if the destination interconnect is full.
    WaitInterconnect,
    /// Coherent cache controller: complete re-insertion of a filled line
    /// after `access_latency` cycles.
    CacheInsert,

    /// CPU-side controller: retry a queue insertion that previously found
    /// the L1-facing interconnect full.
    CpuAccessRetry,
    /// CPU-side controller: an upstream response arrived; wake dependents.
    CpuHandleResponse,

    /// Bus interconnect: address-phase round-robin arbitration.
    BusBroadcast,
    /// Bus interconnect: address-phase broadcast completion / fan-out.
    BusBroadcastCompleted,
    /// Bus interconnect: data-phase gather complete, begin data broadcast.
    BusDataBroadcast,
    /// Bus interconnect: data-phase fan-out completion.
    BusDataBroadcastCompleted,

    /// Switch interconnect: attempt to send the head of a port's queue.
    SwitchSend,
    /// Switch interconnect: a send's transfer latency has elapsed.
    SwitchSendComplete,

    /// DRAM controller: a bank access's latency has elapsed.
    DramComplete,
}

/// The "argument pointer" of spec §4.1: an opaque index into whichever
/// table the target component's handler for `kind` expects. `None`
/// corresponds to the reference's `NULL` argument (e.g. "re-arbitrate from
/// scratch" on the bus).
pub type EventArg = Option<crate::common::SlabIndex>;

/// A single scheduled callback.
#[derive(Clone, Copy, Debug)]
pub struct Event {
    /// Component the callback fires on.
    pub target: ComponentId,
    /// Which handler to invoke.
    pub kind: EventKind,
    /// Opaque argument for the handler.
    pub arg: EventArg,
    /// Absolute cycle the event is due.
    pub fire_cycle: u64,
    sequence: u64,
}

/// Max-heap entry ordered so the *smallest* `(fire_cycle, sequence)` sorts
/// first out of a `BinaryHeap` (which is a max-heap) via `Reverse`-style
/// inverted `Ord`.
#[derive(Debug)]
struct HeapEntry(Event);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.fire_cycle == other.0.fire_cycle && self.0.sequence == other.0.sequence
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // fire_cycle (and, on ties, the earliest sequence number) on top.
        other
            .0
            .fire_cycle
            .cmp(&self.0.fire_cycle)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A trait implemented by whatever owns the components an [`EventQueue`]
/// schedules against — in this crate, always
/// [`crate::hierarchy::MemoryHierarchy`]. Kept as a trait (rather than
/// hard-wiring `MemoryHierarchy` into this module) so the queue's own FIFO-
/// ordering invariant can be unit-tested with a bare recording sink.
pub trait EventSink {
    /// Invoke the handler named by `(target, kind)` with `arg`.
    fn dispatch(&mut self, target: ComponentId, kind: EventKind, arg: EventArg);
}

/// The global priority queue of pending callbacks, plus the simulator's
/// cycle counter.
#[derive(Default, Debug)]
pub struct EventQueue {
    heap: BinaryHeap<HeapEntry>,
    now: u64,
    next_sequence: u64,
}

impl EventQueue {
    /// Creates an empty queue with the cycle counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: 0,
            next_sequence: 0,
        }
    }

    /// The current simulated cycle.
    #[inline]
    #[must_use]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of events still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    /// Schedules `kind` to fire on `target` after `delay_cycles`.
    ///
    /// If `delay_cycles == 0`, the callback is invoked immediately through
    /// `sink` and the event queue is never touched — this is the "bypass
    /// the queue entirely" behavior of spec §4.1, and is what lets one
    /// `clock()` call execute an arbitrarily long chain of zero-delay
    /// events synchronously before returning.
    pub fn add_event(
        &mut self,
        sink: &mut impl EventSink,
        target: ComponentId,
        kind: EventKind,
        delay_cycles: u64,
        arg: EventArg,
    ) {
        if delay_cycles == 0 {
            sink.dispatch(target, kind, arg);
            return;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(HeapEntry(Event {
            target,
            kind,
            arg,
            fire_cycle: self.now + delay_cycles,
            sequence,
        }));
    }

    /// Advances the cycle counter by one and invokes every event due at or
    /// before the new `now`, in `(fire_cycle, insertion-order)` order.
    /// Handlers invoked here may themselves schedule further events
    /// (including zero-delay ones, which run inline before this call
    /// returns).
    pub fn clock(&mut self, sink: &mut impl EventSink) {
        self.now += 1;
        while let Some(top) = self.heap.peek() {
            if top.0.fire_cycle > self.now {
                break;
            }
            // Safe to unwrap: we just peeked Some.
            #[allow(clippy::unwrap_used)]
            let entry = self.heap.pop().unwrap().0;
            sink.dispatch(entry.target, entry.kind, entry.arg);
        }
    }

    /// Drops all pending events without invoking them (used by
    /// `MemoryHierarchy::flush`/reset).
    pub fn reset(&mut self) {
        self.heap.clear();
    }
}
