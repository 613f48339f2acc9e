//! Split-phase bus interconnect: round-robin arbitrated broadcast with
//! independent address- and data-bus pipelines (spec §4.7).
//!
//! Grounded on `splitPhaseBus.cpp`'s `BusInterconnect`, collapsed to the
//! three steps spec §4.7 names for each phase. As in [`crate::dram`], this
//! module never touches [`crate::event::EventQueue`] itself — every method
//! returns an outcome the facade schedules follow-up events from.

use std::collections::VecDeque;

use crate::common::{ControllerId, Slab, SlabIndex};
use crate::request::RequestHandle;

/// A handle to a pending (address-phase-complete, gathering responses)
/// entry.
pub type PendingHandle = SlabIndex;

#[derive(Debug)]
struct AddrEntry {
    request: RequestHandle,
    has_data: bool,
    is_update: bool,
}

#[derive(Debug)]
struct PendingEntry {
    request: RequestHandle,
    home: usize,
    response_received: Vec<bool>,
    controller_with_data: Option<usize>,
    shared: bool,
}

/// Parameters for a [`Bus`].
#[derive(Clone, Copy, Debug)]
pub struct BusParams {
    /// Cycles for the address-broadcast and data-broadcast phases.
    pub latency: u64,
    /// Cycles an arbitration decision takes before it is acted on.
    pub arbitrate_latency: u64,
    /// Per-controller address-queue depth.
    pub queue_size: usize,
}

/// Result of [`Bus::controller_request`].
#[derive(Debug)]
pub enum RequestOutcome {
    /// A fresh address-phase entry was queued and the bus was idle, so the
    /// caller must schedule `broadcast` at `+1`.
    ScheduleBroadcast,
    /// Queued behind other address-phase traffic.
    Queued,
    /// The sender's address-queue is full.
    Full,
    /// This was a response to an in-flight request (data-phase gather).
    ResponseRecorded {
        pending: PendingHandle,
        /// Controllers that must be told to drop this request: every
        /// not-yet-responded peer, the moment any private responder
        /// supplies data (spec §4.7 data-phase step 1).
        annul_targets: Vec<usize>,
        /// Whether every controller has now responded (or the data source
        /// is known and snoop is disabled), meaning the caller should
        /// schedule `data_broadcast` at `+1` if the data bus is free.
        ready: bool,
    },
}

/// Result of [`Bus::broadcast`].
#[derive(Debug)]
pub enum BroadcastOutcome {
    /// Nothing to broadcast; the address bus goes idle.
    Idle,
    /// Blocked by a full pending-request queue or a full peer receive
    /// queue; retry `broadcast` after `latency` cycles.
    Retry,
    /// Arbitration chose `sender`'s head entry; schedule `broadcast_completed`
    /// at `+latency`.
    Advance { sender: usize },
}

/// Result of [`Bus::broadcast_completed`].
#[derive(Debug)]
pub enum BroadcastCompletedOutcome {
    /// Still blocked; retry `broadcast_completed` for the same `sender`
    /// after `latency` cycles.
    StillBlocked,
    /// The address-phase entry was broadcast. `pending` is `Some` unless
    /// the request was an update/evict (those are one-way, no gathered
    /// response). `broadcast_to` lists every controller index except the
    /// sender. The caller must then call [`Bus::broadcast`] again
    /// (immediate re-arbitration).
    Completed {
        request: RequestHandle,
        has_data: bool,
        pending: Option<PendingHandle>,
        broadcast_to: Vec<usize>,
    },
}

/// Result of [`Bus::data_broadcast_completed`].
#[derive(Debug)]
pub struct DataCompletedOutcome {
    /// The completed request.
    pub request: RequestHandle,
    /// Every controller index the data message goes to (everyone except
    /// the data source, which already holds the line).
    pub broadcast_to: Vec<usize>,
}

/// Split-phase bus fabric.
#[derive(Debug)]
pub struct Bus {
    controllers: Vec<ControllerId>,
    queues: Vec<VecDeque<AddrEntry>>,
    pending: Slab<PendingEntry>,
    queue_size: usize,
    bus_busy: bool,
    data_bus_busy: bool,
    last_served: Option<usize>,
    latency: u64,
    arbitrate_latency: u64,
}

impl Bus {
    /// Creates a bus with no controllers registered.
    #[must_use]
    pub fn new(params: BusParams) -> Self {
        Self {
            controllers: Vec::new(),
            queues: Vec::new(),
            pending: Slab::new(),
            queue_size: params.queue_size,
            bus_busy: false,
            data_bus_busy: false,
            last_served: None,
            latency: params.latency,
            arbitrate_latency: params.arbitrate_latency,
        }
    }

    /// Attaches a controller, returning its port index.
    pub fn register(&mut self, controller: ControllerId) -> usize {
        self.controllers.push(controller);
        self.queues.push(VecDeque::new());
        self.controllers.len() - 1
    }

    /// Cycles the address- and data-broadcast phases each take.
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Cycles an arbitration decision takes before it is acted on.
    #[must_use]
    pub fn arbitrate_latency(&self) -> u64 {
        self.arbitrate_latency
    }

    fn find_pending_for(&self, request: RequestHandle) -> Option<PendingHandle> {
        self.pending.iter().find(|(_, e)| e.request == request).map(|(h, _)| h)
    }

    /// Either records a data-phase response against an in-flight request,
    /// or queues a fresh address-phase entry.
    pub fn controller_request(
        &mut self,
        sender: usize,
        request: RequestHandle,
        has_data: bool,
        is_private_responder: bool,
        is_shared: bool,
        is_update: bool,
    ) -> RequestOutcome {
        if let Some(handle) = self.find_pending_for(request) {
            let n = self.controllers.len();
            let entry = self.pending.get_mut(handle).expect("handle just found");
            entry.response_received[sender] = true;
            if has_data {
                entry.controller_with_data = Some(sender);
            }

            let mut annul_targets = Vec::new();
            if is_private_responder {
                entry.shared |= is_shared;
                if has_data {
                    for i in 0..n {
                        if !entry.response_received[i] {
                            entry.response_received[i] = true;
                            annul_targets.push(i);
                        }
                    }
                }
            }

            let ready = entry.response_received.iter().all(|&r| r);
            return RequestOutcome::ResponseRecorded {
                pending: handle,
                annul_targets,
                ready,
            };
        }

        if self.queues[sender].len() >= self.queue_size {
            return RequestOutcome::Full;
        }
        self.queues[sender].push_back(AddrEntry {
            request,
            has_data,
            is_update,
        });
        if self.bus_busy {
            RequestOutcome::Queued
        } else {
            self.bus_busy = true;
            RequestOutcome::ScheduleBroadcast
        }
    }

    fn arbitrate(&self) -> Option<usize> {
        let n = self.controllers.len();
        if n == 0 {
            return None;
        }
        let start = self.last_served.unwrap_or(0);
        for offset in 1..=n {
            let i = (start + offset) % n;
            if !self.queues[i].is_empty() {
                return Some(i);
            }
        }
        None
    }

    /// Round-robin arbitration over non-empty address queues, starting
    /// after the last-served controller (spec §4.7 address-phase step 2).
    pub fn broadcast(&mut self, pending_queue_full: bool, peer_full: &[bool]) -> BroadcastOutcome {
        let Some(sender) = self.arbitrate() else {
            self.bus_busy = false;
            return BroadcastOutcome::Idle;
        };

        let is_update = self.queues[sender].front().expect("arbitrate found a non-empty queue").is_update;
        if !is_update && pending_queue_full {
            return BroadcastOutcome::Retry;
        }
        if peer_full.iter().enumerate().any(|(i, &full)| i != sender && full) {
            return BroadcastOutcome::Retry;
        }

        self.last_served = Some(sender);
        BroadcastOutcome::Advance { sender }
    }

    /// Completes the address-phase broadcast for `sender`'s head entry.
    pub fn broadcast_completed(&mut self, sender: usize, peer_full: &[bool]) -> BroadcastCompletedOutcome {
        if peer_full.iter().enumerate().any(|(i, &full)| i != sender && full) {
            return BroadcastCompletedOutcome::StillBlocked;
        }

        let entry = self.queues[sender].pop_front().expect("entry chosen by broadcast() must still be head");
        let n = self.controllers.len();

        let pending = if entry.is_update {
            None
        } else {
            let mut response_received = vec![false; n];
            response_received[sender] = true;
            Some(self.pending.insert(PendingEntry {
                request: entry.request,
                home: sender,
                response_received,
                controller_with_data: None,
                shared: false,
            }))
        };

        let broadcast_to = (0..n).filter(|&i| i != sender).collect();
        BroadcastCompletedOutcome::Completed {
            request: entry.request,
            has_data: entry.has_data,
            pending,
            broadcast_to,
        }
    }

    /// Whether the data bus is currently broadcasting a gathered response.
    #[must_use]
    pub fn data_bus_busy(&self) -> bool {
        self.data_bus_busy
    }

    /// Marks the data bus busy for `pending` (the caller has already
    /// confirmed it is ready via [`RequestOutcome::ResponseRecorded`]'s
    /// `ready` flag or [`Bus::next_ready_pending`]).
    pub fn start_data_broadcast(&mut self, pending: PendingHandle) {
        debug_assert!(self.pending.contains(pending), "start_data_broadcast on an unknown pending entry");
        self.data_bus_busy = true;
    }

    /// Scans for another pending entry whose responses are all in, for the
    /// facade to kick off next once the data bus frees up.
    #[must_use]
    pub fn next_ready_pending(&self) -> Option<PendingHandle> {
        self.pending
            .iter()
            .find(|(_, e)| e.response_received.iter().all(|&r| r))
            .map(|(h, _)| h)
    }

    /// Completes the data-phase broadcast for `pending`, freeing its slot.
    pub fn data_broadcast_completed(&mut self, pending: PendingHandle) -> DataCompletedOutcome {
        let entry = self.pending.remove(pending).expect("data_broadcast_completed on a stale pending entry");
        let n = self.controllers.len();
        let broadcast_to = (0..n)
            .filter(|&i| Some(i) != entry.controller_with_data)
            .collect();
        if self.next_ready_pending().is_none() {
            self.data_bus_busy = false;
        }
        DataCompletedOutcome {
            request: entry.request,
            broadcast_to,
        }
    }

    /// Removes every address-phase and pending entry for `request`, across
    /// every controller's queue.
    pub fn annul(&mut self, request: RequestHandle) {
        for queue in &mut self.queues {
            queue.retain(|e| e.request != request);
        }
        let targets: Vec<PendingHandle> = self
            .pending
            .iter()
            .filter(|(_, e)| e.request == request)
            .map(|(h, _)| h)
            .collect();
        for handle in targets {
            let _ = self.pending.remove(handle);
        }
    }

    /// The controller index that originated a still-pending entry.
    #[must_use]
    pub fn home_of(&self, pending: PendingHandle) -> Option<usize> {
        self.pending.get(pending).map(|e| e.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PhysAddr;
    use crate::request::{OpType, RequestPool, RequestSpec};

    fn bus3() -> (Bus, usize, usize, usize) {
        let mut b = Bus::new(BusParams {
            latency: 4,
            arbitrate_latency: 1,
            queue_size: 2,
        });
        let a = b.register(ControllerId(0));
        let c = b.register(ControllerId(1));
        let d = b.register(ControllerId(2));
        (b, a, c, d)
    }

    fn req(pool: &mut RequestPool) -> RequestHandle {
        pool.allocate(RequestSpec {
            addr: PhysAddr::new(0x1000),
            op: OpType::Read,
            core_id: 0,
            thread_id: 0,
            rob_id: 0,
            uuid: 0,
            issued_at: 0,
            is_icache: false,
            is_kernel: false,
        })
    }

    #[test]
    fn first_request_on_an_idle_bus_schedules_broadcast() {
        let (mut bus, a, _c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        assert!(matches!(
            bus.controller_request(a, r, false, false, false, false),
            RequestOutcome::ScheduleBroadcast
        ));
    }

    #[test]
    fn full_queue_is_rejected() {
        let (mut bus, a, _c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r1 = req(&mut pool);
        let r2 = req(&mut pool);
        let r3 = req(&mut pool);
        bus.controller_request(a, r1, false, false, false, false);
        bus.controller_request(a, r2, false, false, false, false);
        assert!(matches!(
            bus.controller_request(a, r3, false, false, false, false),
            RequestOutcome::Full
        ));
    }

    #[test]
    fn round_robin_scans_forward_from_the_last_served_port() {
        let (mut bus, a, c, d) = bus3();
        let mut pool = RequestPool::new();
        let r_a = req(&mut pool);
        let r_d = req(&mut pool);
        bus.controller_request(a, r_a, false, false, false, false);
        bus.controller_request(d, r_d, false, false, false, false);

        // Nothing served yet: scan starts just past port 0 (a itself), so
        // port 1 (c, empty) is checked before port 2 (d, non-empty).
        match bus.broadcast(false, &[false, false, false]) {
            BroadcastOutcome::Advance { sender } => assert_eq!(sender, d),
            other => panic!("expected Advance, got {other:?}"),
        }
        bus.broadcast_completed(d, &[false, false, false]);

        // Having served d (port 2), the scan wraps to port 0 (a) next.
        match bus.broadcast(false, &[false, false, false]) {
            BroadcastOutcome::Advance { sender } => assert_eq!(sender, a),
            other => panic!("expected Advance, got {other:?}"),
        }
        let _ = c;
    }

    #[test]
    fn broadcast_completed_creates_a_pending_entry_with_originator_preset() {
        let (mut bus, a, _c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        bus.controller_request(a, r, false, false, false, false);
        bus.broadcast(false, &[false, false, false]);
        match bus.broadcast_completed(a, &[false, false, false]) {
            BroadcastCompletedOutcome::Completed {
                pending,
                broadcast_to,
                ..
            } => {
                let pending = pending.expect("non-update request must get a pending entry");
                assert_eq!(broadcast_to, vec![1, 2]);
                assert_eq!(bus.home_of(pending), Some(a));
            }
            BroadcastCompletedOutcome::StillBlocked => panic!("expected Completed"),
        }
    }

    #[test]
    fn update_requests_never_create_a_pending_entry() {
        let (mut bus, a, _c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        bus.controller_request(a, r, false, false, false, true);
        bus.broadcast(false, &[false, false, false]);
        match bus.broadcast_completed(a, &[false, false, false]) {
            BroadcastCompletedOutcome::Completed { pending, .. } => assert!(pending.is_none()),
            BroadcastCompletedOutcome::StillBlocked => panic!("expected Completed"),
        }
    }

    #[test]
    fn first_private_data_response_annuls_all_other_outstanding_peers() {
        let (mut bus, a, c, d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        bus.controller_request(a, r, false, false, false, false);
        bus.broadcast(false, &[false, false, false]);
        let BroadcastCompletedOutcome::Completed { pending, .. } = bus.broadcast_completed(a, &[false, false, false])
        else {
            panic!()
        };
        let pending = pending.unwrap();

        // Controller c responds first, with data, as a private cache.
        match bus.controller_request(c, r, true, true, false, false) {
            RequestOutcome::ResponseRecorded {
                annul_targets,
                ready,
                ..
            } => {
                assert_eq!(annul_targets, vec![d], "d had not yet responded and must be annulled");
                assert!(ready, "originator + responder + annulled peer covers every controller");
            }
            RequestOutcome::Full | RequestOutcome::Queued | RequestOutcome::ScheduleBroadcast => {
                panic!("expected ResponseRecorded")
            }
        }
        let _ = pending;
    }

    #[test]
    fn data_broadcast_completed_skips_the_data_source() {
        let (mut bus, a, c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        bus.controller_request(a, r, false, false, false, false);
        bus.broadcast(false, &[false, false, false]);
        let BroadcastCompletedOutcome::Completed { pending, .. } = bus.broadcast_completed(a, &[false, false, false])
        else {
            panic!()
        };
        let pending = pending.unwrap();
        bus.controller_request(c, r, true, true, false, false);
        bus.controller_request(a, r, false, true, false, false); // fills out response bitmap if needed
        bus.start_data_broadcast(pending);
        let outcome = bus.data_broadcast_completed(pending);
        assert!(!outcome.broadcast_to.contains(&c));
    }

    #[test]
    fn annul_removes_queued_and_pending_entries() {
        let (mut bus, a, _c, _d) = bus3();
        let mut pool = RequestPool::new();
        let r = req(&mut pool);
        bus.controller_request(a, r, false, false, false, false);
        bus.annul(r);
        assert!(matches!(
            bus.broadcast(false, &[false, false, false]),
            BroadcastOutcome::Idle
        ));
    }
}
