//! `MemoryHierarchy`: the facade that owns every component, wires them
//! together from a [`crate::config::MachineConfig`], and is the sole
//! [`EventSink`] the event queue dispatches into (spec §5, §6).
//!
//! Every other module in this crate is data-only; this is the one place
//! that decides, from an outcome enum, which follow-up event to schedule
//! next. A producer (the embedding core simulator) drives the hierarchy
//! through [`MemoryHierarchy::cpu_access`]/`clock`/`annul_request`/`flush`
//! and receives completions back through the [`RequestProducer`] trait.
//!
//! This facade wires a single downward path per access — CPU, through zero
//! or more cache levels, to DRAM — using each level's real interconnect
//! (point-to-point, switch, or bus) for the forwarding hop's timing and
//! contention, and a `chains` table to walk the response back up through
//! every level that forwarded the miss, calling each one's `complete_fill`
//! in turn, before finally waking the issuing core. A bus's address-phase
//! completion delivers to every other port, not just one: same-role peers
//! (the other private caches sharing that bus) receive it as a snoop
//! (`from_interconnect: true`, routed straight into
//! [`crate::controller::cache::CacheController`]'s interconnect-hit/miss
//! path), and the differently-roled home level receives it as an ordinary
//! forward. A single-home-node [`Directory`] backs MOESI's
//! directory-mediated invalidation; a dirty eviction synthesizes a
//! one-way write-back that walks the same forwarding path as a normal
//! miss.

use std::collections::HashMap;

use crate::coherence::directory::Directory;
use crate::coherence::tsx;
use crate::common::{BuildError, ComponentId, ControllerId, DramId, InterconnectId, PhysAddr, Slab, SlabIndex};
use crate::config::{ConnectionConfig, ControllerKindConfig, InterconnectKindConfig, MachineConfig, Role};
use crate::controller::cache::{
    AccessOutcome as CacheAccessOutcome, BeginOutcome, CacheController, CacheParams, HitOutcome, MissOutcome,
    PendingHandle,
};
use crate::controller::cpu::{AccessOutcome as CpuAccessOutcome, CpuController};
use crate::dram::{DramController, EnqueueOutcome};
use crate::event::{EventArg, EventKind, EventQueue, EventSink};
use crate::interconnect::bus::{Bus, BusParams, BroadcastCompletedOutcome, BroadcastOutcome, RequestOutcome as BusRequestOutcome};
use crate::interconnect::p2p::P2p;
use crate::interconnect::switch::{
    CompleteOutcome as SwitchCompleteOutcome, RequestOutcome as SwitchRequestOutcome, SendOutcome, Switch, SwitchParams,
};
use crate::line::LineArrayParams;
use crate::request::{OpType, RequestHandle, RequestPool, RequestSpec, TsxMarker};
use crate::stats::Stats;

/// Callbacks the embedding core simulator implements to learn about
/// completions this crate can't resolve on its own (spec §6).
pub trait RequestProducer {
    /// A data access completed or was satisfied from cache; wake whatever
    /// in-flight instruction is waiting on `rob_id`.
    fn wakeup(&mut self, core_id: u32, rob_id: u32);

    /// An instruction fetch completed. Default: same as [`Self::wakeup`].
    fn icache_wakeup(&mut self, core_id: u32, rob_id: u32) {
        self.wakeup(core_id, rob_id);
    }

    /// A data access completed. Default: same as [`Self::wakeup`].
    fn dcache_wakeup(&mut self, core_id: u32, rob_id: u32) {
        self.wakeup(core_id, rob_id);
    }

    /// A TSX transaction on `thread_id` had to abort due to a coherence
    /// conflict (see [`crate::coherence::tsx`]). Default: no-op, since
    /// rolling back architectural state is a producer-side concern this
    /// crate never models.
    fn tsx_abort(&mut self, _core_id: u32, _thread_id: u32) {}
}

enum ControllerVariant {
    Cpu(CpuController),
    Cache(CacheController),
}

struct ControllerEntry {
    variant: ControllerVariant,
    lower: Option<InterconnectId>,
    connects_to_dram: bool,
}

enum InterconnectVariant {
    P2p(P2p),
    Switch(Switch),
    Bus(Bus),
}

struct InterconnectEntry {
    variant: InterconnectVariant,
    /// `(controller, role)` in registration order; index is the fabric's
    /// port number for that controller.
    ports: Vec<(ControllerId, Role)>,
}

impl InterconnectEntry {
    fn port_of(&self, controller: ControllerId) -> Option<usize> {
        self.ports.iter().position(|&(c, _)| c == controller)
    }

    /// The controller on the opposite side of `from`'s role — i.e. where a
    /// message from `from` should be delivered. Assumes exactly one
    /// controller registered on the other side, the common private-link /
    /// shared-next-level case.
    fn other_side(&self, from: ControllerId) -> Option<ControllerId> {
        let from_role = self.ports.iter().find(|&&(c, _)| c == from)?.1;
        let target_role = match from_role {
            Role::Lower => Role::Upper,
            Role::Upper => Role::Lower,
        };
        self.ports.iter().find(|&&(c, role)| role == target_role).map(|&(c, _)| c)
    }
}

/// The complete, running memory hierarchy.
#[derive(Debug)]
pub struct MemoryHierarchy<P: RequestProducer> {
    requests: RequestPool,
    events: EventQueue,
    controllers: Vec<ControllerEntry>,
    controller_index: HashMap<String, ControllerId>,
    interconnects: Vec<InterconnectEntry>,
    dram: DramController,
    /// Per-request stack of `(controller, pending)` entries a miss pushed
    /// before forwarding further down; popped in LIFO order as the
    /// response works its way back up (see module doc comment).
    chains: HashMap<RequestHandle, Vec<(ControllerId, PendingHandle)>>,
    /// The `shared` bit a chain level's eventual `CacheInsert` should apply,
    /// stashed here because an [`crate::event::EventArg`] can only carry one
    /// slab handle and `CacheInsert` already carries the pending handle.
    pending_shared: HashMap<PendingHandle, bool>,
    /// Auxiliary slab minting [`crate::common::SlabIndex`] handles for raw
    /// switch/bus port numbers, which have no slab of their own to be
    /// indices into.
    port_args: Slab<usize>,
    /// Single global MOESI sharer/owner directory. A real multi-home-node
    /// directory shards by address across several home nodes; this facade
    /// models one home node for the whole address space.
    directory: Directory,
    /// Maps a private cache to the CPU controller directly above it over a
    /// point-to-point link — the only topology this facade tracks TSX
    /// reservations for, since tagging requires a single owning thread per
    /// controller (see [`CacheController::tsx_active_thread`]).
    owning_core: HashMap<ControllerId, ControllerId>,
    stats: Stats,
    producer: P,
}

fn controller_of(target: ComponentId) -> ControllerId {
    match target {
        ComponentId::Controller(c) => c,
        _ => unreachable!("event dispatched to a controller-only handler with a non-controller target"),
    }
}

fn interconnect_of(target: ComponentId) -> InterconnectId {
    match target {
        ComponentId::Interconnect(i) => i,
        _ => unreachable!("event dispatched to an interconnect-only handler with a non-interconnect target"),
    }
}

impl<P: RequestProducer> MemoryHierarchy<P> {
    /// Builds a hierarchy from a machine description.
    pub fn build(config: &MachineConfig, producer: P) -> Result<Self, BuildError> {
        let mut controller_index = HashMap::new();
        let mut controllers = Vec::new();
        for (i, c) in config.controllers.iter().enumerate() {
            if controller_index.insert(c.name.clone(), ControllerId(i as u32)).is_some() {
                return Err(BuildError::DuplicateName(c.name.clone()));
            }
            let variant = match &c.kind {
                ControllerKindConfig::Cpu {
                    pending_capacity,
                    line_bytes,
                    tlb_capacity: _,
                } => ControllerVariant::Cpu(CpuController::new(*pending_capacity, *line_bytes)),
                ControllerKindConfig::Cache(cache) => ControllerVariant::Cache(CacheController::new(CacheParams {
                    line: LineArrayParams {
                        num_sets: cache.num_sets,
                        ways: cache.ways,
                        line_bytes: cache.line_bytes,
                        read_ports: cache.read_ports,
                        write_ports: cache.write_ports,
                    },
                    protocol: cache.protocol.protocol(),
                    is_lowest_private: cache.is_lowest_private,
                    access_latency: cache.access_latency,
                    pending_capacity: cache.pending_capacity,
                    interconnect_reserve: cache.interconnect_reserve,
                    tsx_enabled: cache.protocol.tsx_enabled(),
                })),
            };
            let connects_to_dram = matches!(&c.kind, ControllerKindConfig::Cache(cache) if cache.connects_to_dram);
            controllers.push(ControllerEntry {
                variant,
                lower: None,
                connects_to_dram,
            });
        }

        let mut interconnect_index = HashMap::new();
        let mut interconnects = Vec::new();
        for (i, ic) in config.interconnects.iter().enumerate() {
            if interconnect_index.insert(ic.name.clone(), InterconnectId(i as u32)).is_some() {
                return Err(BuildError::DuplicateName(ic.name.clone()));
            }
            let variant = match &ic.kind {
                InterconnectKindConfig::P2p => InterconnectVariant::P2p(P2p::new()),
                InterconnectKindConfig::Switch { latency, retry_latency } => InterconnectVariant::Switch(Switch::new(SwitchParams {
                    latency: *latency,
                    retry_latency: *retry_latency,
                })),
                InterconnectKindConfig::Bus {
                    latency,
                    arbitrate_latency,
                    queue_size,
                } => InterconnectVariant::Bus(Bus::new(BusParams {
                    latency: *latency,
                    arbitrate_latency: *arbitrate_latency,
                    queue_size: *queue_size,
                })),
            };
            interconnects.push(InterconnectEntry { variant, ports: Vec::new() });
        }

        for conn in &config.connections {
            Self::wire_connection(conn, &controller_index, &interconnect_index, &mut controllers, &mut interconnects)?;
        }

        for (name, &id) in &controller_index {
            let entry = &controllers[id.0 as usize];
            if entry.lower.is_none() && !entry.connects_to_dram {
                return Err(BuildError::UnconnectedController(name.clone()));
            }
        }

        let stats = Stats {
            caches: controllers.iter().map(|_| crate::stats::CacheStats::default()).collect(),
            interconnects: interconnects.iter().map(|_| crate::stats::InterconnectStats::default()).collect(),
            dram: crate::stats::DramStats::default(),
        };

        // A direct CPU<->cache P2P link is the only topology a TSX
        // reservation can be unambiguously attributed to a single core.
        let mut owning_core = HashMap::new();
        for entry in &interconnects {
            if !matches!(entry.variant, InterconnectVariant::P2p(_)) {
                continue;
            }
            let cpus: Vec<ControllerId> = entry
                .ports
                .iter()
                .filter(|&&(c, _)| matches!(controllers[c.0 as usize].variant, ControllerVariant::Cpu(_)))
                .map(|&(c, _)| c)
                .collect();
            let caches: Vec<ControllerId> = entry
                .ports
                .iter()
                .filter(|&&(c, _)| matches!(controllers[c.0 as usize].variant, ControllerVariant::Cache(_)))
                .map(|&(c, _)| c)
                .collect();
            if let (&[cpu], &[cache]) = (cpus.as_slice(), caches.as_slice()) {
                let _ = owning_core.insert(cache, cpu);
            }
        }

        Ok(Self {
            requests: RequestPool::new(),
            events: EventQueue::new(),
            controllers,
            controller_index,
            interconnects,
            dram: DramController::new(config.dram),
            chains: HashMap::new(),
            pending_shared: HashMap::new(),
            port_args: Slab::new(),
            directory: Directory::new(),
            owning_core,
            stats,
            producer,
        })
    }

    fn wire_connection(
        conn: &ConnectionConfig,
        controller_index: &HashMap<String, ControllerId>,
        interconnect_index: &HashMap<String, InterconnectId>,
        controllers: &mut [ControllerEntry],
        interconnects: &mut [InterconnectEntry],
    ) -> Result<(), BuildError> {
        let &controller_id = controller_index
            .get(&conn.controller)
            .ok_or_else(|| BuildError::UnknownComponent(conn.controller.clone()))?;
        let &interconnect_id = interconnect_index
            .get(&conn.interconnect)
            .ok_or_else(|| BuildError::UnknownComponent(conn.interconnect.clone()))?;

        if conn.role == Role::Lower {
            controllers[controller_id.0 as usize].lower = Some(interconnect_id);
        }

        let fabric = &mut interconnects[interconnect_id.0 as usize];
        let registered = match &mut fabric.variant {
            InterconnectVariant::P2p(p2p) => p2p.register(controller_id),
            InterconnectVariant::Switch(sw) => {
                let _ = sw.register(controller_id);
                true
            }
            InterconnectVariant::Bus(bus) => {
                let _ = bus.register(controller_id);
                true
            }
        };
        if !registered {
            return Err(BuildError::UnknownComponent(conn.controller.clone()));
        }
        fabric.ports.push((controller_id, conn.role));
        Ok(())
    }

    /// Current simulated cycle.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.events.now()
    }

    /// Advances the simulator by one cycle.
    pub fn clock(&mut self) {
        // EventQueue::clock needs `&mut self` as the sink, but we are the
        // sink and also own the queue — split the borrow by taking the
        // queue out for the duration of the call.
        let mut events = std::mem::take(&mut self.events);
        events.clock(self);
        self.events = events;
    }

    /// Collected counters.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Looks up a controller by its configured name.
    #[must_use]
    pub fn controller_id(&self, name: &str) -> Option<ControllerId> {
        self.controller_index.get(name).copied()
    }

    /// Every controller built as a cache (not a CPU front end), in
    /// build order. Lets a test scan the whole hierarchy for a coherence
    /// invariant without needing to name every level up front.
    #[must_use]
    pub fn cache_controller_ids(&self) -> Vec<ControllerId> {
        self.controllers
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c.variant, ControllerVariant::Cache(_)))
            .map(|(i, _)| ControllerId(i as u32))
            .collect()
    }

    /// The coherence state `at` currently holds for `addr`, if any. `None`
    /// if `at` isn't a cache controller or doesn't currently cache the line.
    #[must_use]
    pub fn peek_cache_state(&self, at: ControllerId, addr: PhysAddr) -> Option<u8> {
        let ControllerVariant::Cache(cache) = &self.controllers[at.0 as usize].variant else {
            return None;
        };
        cache.peek_state(addr)
    }

    /// Borrows the embedding producer, mainly so a driver or test can
    /// inspect state a callback recorded without owning the hierarchy.
    #[must_use]
    pub fn producer(&self) -> &P {
        &self.producer
    }

    fn schedule(&mut self, target: ComponentId, kind: EventKind, delay: u64, arg: EventArg) {
        let mut events = std::mem::take(&mut self.events);
        events.add_event(self, target, kind, delay, arg);
        self.events = events;
    }

    fn mint_port_arg(&mut self, port: usize) -> SlabIndex {
        self.port_args.insert(port)
    }

    fn take_port_arg(&mut self, handle: SlabIndex) -> usize {
        self.port_args.remove(handle).unwrap_or(0)
    }

    /// Issues a new access from a CPU-side controller (spec §6's
    /// `access_cache` entry point).
    #[allow(clippy::too_many_arguments)]
    pub fn cpu_access(
        &mut self,
        core: ControllerId,
        addr: PhysAddr,
        op: OpType,
        thread_id: u32,
        rob_id: u32,
        uuid: u64,
        issued_at: u64,
        is_icache: bool,
        is_kernel: bool,
    ) -> bool {
        if let OpType::Tsx(marker) = op {
            let ControllerVariant::Cpu(cpu) = &mut self.controllers[core.0 as usize].variant else {
                return false;
            };
            let _ = cpu.apply_tsx_marker(thread_id, op);
            if marker == TsxMarker::Abort {
                self.producer.tsx_abort(core.0, thread_id);
            }
            self.producer.wakeup(core.0, rob_id);
            return true;
        }

        let request = self.requests.allocate(RequestSpec {
            addr,
            op,
            core_id: core.0,
            thread_id,
            rob_id,
            uuid,
            issued_at,
            is_icache,
            is_kernel,
        });

        let issued = match &mut self.controllers[core.0 as usize].variant {
            ControllerVariant::Cpu(cpu) => cpu.access(request, addr, is_icache),
            ControllerVariant::Cache(_) => {
                let _ = self.requests.release(request);
                return false;
            }
        };
        match issued {
            CpuAccessOutcome::Issue => {
                self.forward_new_access(core, request, addr, op);
                true
            }
            CpuAccessOutcome::Deduped => true,
            CpuAccessOutcome::Full => {
                let _ = self.requests.release(request);
                false
            }
        }
    }

    /// Starts a new access at whatever controller is immediately below
    /// `from` — called both for a CPU's first issue and for a cache miss
    /// forwarding further down.
    fn forward_new_access(&mut self, from: ControllerId, request: RequestHandle, addr: PhysAddr, op: OpType) {
        let entry = &self.controllers[from.0 as usize];
        if entry.connects_to_dram {
            self.try_dram_enqueue(request, addr, matches!(op, OpType::Update));
            return;
        }
        let Some(interconnect) = entry.lower else {
            return;
        };
        self.send_via(interconnect, from, request, addr, op);
    }

    fn try_dram_enqueue(&mut self, request: RequestHandle, addr: PhysAddr, is_update: bool) {
        match self.dram.enqueue(addr, request, is_update) {
            EnqueueOutcome::Admitted { handle, should_start } => {
                self.stats.dram.accesses += 1;
                if should_start {
                    let latency = self.dram.access_latency();
                    self.schedule(ComponentId::Dram(DramId(0)), EventKind::DramComplete, latency, Some(handle));
                }
            }
            EnqueueOutcome::Merged => self.stats.dram.merges += 1,
            EnqueueOutcome::Full => self.stats.dram.queue_full_drops += 1,
        }
    }

    /// Delivers a message from `from` to whatever is on the other side of
    /// `interconnect`, via that fabric's own send protocol.
    fn send_via(&mut self, interconnect: InterconnectId, from: ControllerId, request: RequestHandle, addr: PhysAddr, op: OpType) {
        let has_data = op.expects_response_data();
        let target = ComponentId::Interconnect(interconnect);
        let idx = interconnect.0 as usize;

        match &self.interconnects[idx].variant {
            InterconnectVariant::P2p(_) => {
                if let Some(to) = self.interconnects[idx].other_side(from) {
                    self.deliver_new_access(to, request, addr, op, false);
                }
            }
            InterconnectVariant::Switch(_) => {
                let Some(from_port) = self.interconnects[idx].port_of(from) else { return };
                let Some(to) = self.interconnects[idx].other_side(from) else { return };
                let Some(to_port) = self.interconnects[idx].port_of(to) else { return };
                let InterconnectVariant::Switch(sw) = &mut self.interconnects[idx].variant else {
                    unreachable!()
                };
                let outcome = sw.controller_request(from_port, to_port, request, has_data);
                if matches!(outcome, SwitchRequestOutcome::ScheduleSend) {
                    let arg = self.mint_port_arg(from_port);
                    self.schedule(target, EventKind::SwitchSend, 1, Some(arg));
                }
            }
            InterconnectVariant::Bus(_) => {
                let Some(from_port) = self.interconnects[idx].port_of(from) else { return };
                let InterconnectVariant::Bus(bus) = &mut self.interconnects[idx].variant else {
                    unreachable!()
                };
                let arbitrate_latency = bus.arbitrate_latency();
                let outcome = bus.controller_request(from_port, request, has_data, false, false, matches!(op, OpType::Update));
                match outcome {
                    BusRequestOutcome::ScheduleBroadcast => {
                        self.schedule(target, EventKind::BusBroadcast, arbitrate_latency, None);
                    }
                    BusRequestOutcome::Full => {
                        self.stats.caches[from.0 as usize].back_pressure_drops += 1;
                    }
                    BusRequestOutcome::Queued | BusRequestOutcome::ResponseRecorded { .. } => {}
                }
            }
        }
    }

    /// A message has physically arrived at `at`: admit it as a new access
    /// if `at` is a cache controller, or as DRAM traffic if it connects
    /// directly. `from_interconnect` marks a snoop or a peer-forwarded
    /// message rather than traffic flowing down this cache's own miss path.
    fn deliver_new_access(&mut self, at: ControllerId, request: RequestHandle, addr: PhysAddr, op: OpType, from_interconnect: bool) {
        if self.controllers[at.0 as usize].connects_to_dram {
            self.try_dram_enqueue(request, addr, matches!(op, OpType::Update));
            return;
        }
        let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
            return;
        };
        match cache.begin_access(request, addr, op, at, from_interconnect) {
            BeginOutcome::Admitted { pending } => {
                let latency = cache.access_latency();
                self.schedule(ComponentId::Controller(at), EventKind::CacheAccess, latency, Some(pending));
            }
            BeginOutcome::Queued { .. } => {}
            BeginOutcome::Full => {
                self.stats.caches[at.0 as usize].back_pressure_drops += 1;
            }
        }
    }

    /// Synthesizes a one-way write-back for a dirty evicted line and sends
    /// it further down the hierarchy from `at`, piggybacking the evicting
    /// request's own metadata (spec §4.5.5/§4.5.6).
    fn writeback(&mut self, at: ControllerId, template: RequestHandle, evicted_addr: PhysAddr) {
        let Some(req) = self.requests.get(template) else { return };
        let spec = RequestSpec {
            addr: evicted_addr,
            op: OpType::Update,
            core_id: req.core_id,
            thread_id: req.thread_id,
            rob_id: req.rob_id,
            uuid: req.uuid,
            issued_at: self.events.now(),
            is_icache: req.is_icache,
            is_kernel: req.is_kernel,
        };
        let writeback_request = self.requests.allocate(spec);
        self.forward_new_access(at, writeback_request, evicted_addr, OpType::Update);
    }

    /// Keeps the MOESI directory's record of `addr`'s holders consistent
    /// with `at`'s actual line state, for MOESI lowest-private caches only
    /// (the only level that ever claims ownership directly from the
    /// directory's point of view).
    fn sync_directory(&mut self, at: ControllerId, addr: PhysAddr) {
        let ControllerVariant::Cache(cache) = &self.controllers[at.0 as usize].variant else {
            return;
        };
        if !matches!(cache.protocol(), crate::coherence::Protocol::Moesi) || !cache.is_lowest_private() {
            return;
        }
        match cache.peek_state(addr).map(crate::coherence::base_state) {
            None | Some(crate::coherence::I) => self.directory.remove_holder(addr, at),
            Some(crate::coherence::M) | Some(crate::coherence::O) => self.directory.set_owner(addr, at),
            Some(_) => self.directory.add_sharer(addr, at),
        }
    }

    /// Sends an invalidating snoop-write to every other holder the
    /// directory knows about for `addr`, then records `at` as the sole
    /// owner. Used when a MOESI lowest-private write hit promotes an Owner
    /// line to Modified (`moesi.rs`'s own comment on that transition: "the
    /// directory must invalidate any other sharers before this completes").
    fn invalidate_other_sharers(&mut self, at: ControllerId, addr: PhysAddr, template: RequestHandle) {
        let holders = self.directory.other_holders(addr, at);
        let Some(req) = self.requests.get(template) else { return };
        let spec = RequestSpec {
            addr,
            op: OpType::Write,
            core_id: req.core_id,
            thread_id: req.thread_id,
            rob_id: req.rob_id,
            uuid: req.uuid,
            issued_at: self.events.now(),
            is_icache: req.is_icache,
            is_kernel: req.is_kernel,
        };
        for holder in holders {
            let snoop_request = self.requests.allocate(spec);
            self.deliver_new_access(holder, snoop_request, addr, OpType::Write, true);
        }
        self.directory.set_owner(addr, at);
    }

    /// The thread a TSX check against `at` should be attributed to: for a
    /// local access this is the requester's own thread; for a snoop, the
    /// reservation being checked belongs to whichever thread last touched
    /// this line locally.
    fn tsx_probe_thread(&self, at: ControllerId, request_thread: u32, from_interconnect: bool) -> u32 {
        if !from_interconnect {
            return request_thread;
        }
        let ControllerVariant::Cache(cache) = &self.controllers[at.0 as usize].variant else {
            return request_thread;
        };
        cache.tsx_active_thread().unwrap_or(request_thread)
    }

    /// Whether `thread_id` has an open TSX transaction, as seen from the
    /// CPU controller directly owning the private cache `at` (see
    /// [`Self::owning_core`]).
    fn tsx_active_for(&mut self, at: ControllerId, thread_id: u32) -> bool {
        let Some(&cpu_id) = self.owning_core.get(&at) else { return false };
        let ControllerVariant::Cpu(cpu) = &mut self.controllers[cpu_id.0 as usize].variant else {
            return false;
        };
        cpu.tsx_state(thread_id).in_tsx()
    }

    /// Reports a detected TSX conflict to the producer, attributing it to
    /// the CPU that owns `at`'s reservation.
    fn report_tsx_conflict(&mut self, at: ControllerId, conflict: Option<(tsx::Conflict, u32)>) {
        let Some((_, thread_id)) = conflict else { return };
        let Some(&cpu_id) = self.owning_core.get(&at) else { return };
        self.producer.tsx_abort(cpu_id.0, thread_id);
    }

    /// Advances a response up the forwarding chain recorded for `request`:
    /// completes the next waiting cache level's fill, or — once the chain
    /// is empty — wakes the issuing core.
    fn advance_chain(&mut self, request: RequestHandle, shared: bool) {
        let next = self.chains.get_mut(&request).and_then(Vec::pop);
        if self.chains.get(&request).is_some_and(Vec::is_empty) {
            let _ = self.chains.remove(&request);
        }
        let Some((ctrl, pending)) = next else {
            self.respond(request);
            return;
        };
        let _ = self.pending_shared.insert(pending, shared);
        let ControllerVariant::Cache(cache) = &self.controllers[ctrl.0 as usize].variant else {
            return;
        };
        let latency = cache.access_latency();
        self.schedule(ComponentId::Controller(ctrl), EventKind::CacheInsert, latency, Some(pending));
    }

    /// Resolves a fully-completed access by waking whichever core issued
    /// it (and every request that deduped against it).
    fn respond(&mut self, request: RequestHandle) {
        let Some(req) = self.requests.get(request) else { return };
        let cpu_id = ControllerId(req.core_id);
        let is_icache = req.is_icache;
        let addr = req.addr;

        let ControllerVariant::Cpu(cpu) = &mut self.controllers[cpu_id.0 as usize].variant else {
            let _ = self.requests.release(request);
            return;
        };
        let Some((original, riders)) = cpu.handle_response(addr) else {
            return;
        };
        for r in std::iter::once(original).chain(riders) {
            let Some(r_req) = self.requests.get(r) else { continue };
            let (core_id, rob_id) = (r_req.core_id, r_req.rob_id);
            if is_icache {
                self.producer.icache_wakeup(core_id, rob_id);
            } else {
                self.producer.dcache_wakeup(core_id, rob_id);
            }
            let _ = self.requests.release(r);
        }
    }

    /// Annuls an in-flight request: removes it from DRAM and every
    /// interconnect's queues, and drops its forwarding chain so a
    /// still-in-flight response has nothing left to propagate into.
    pub fn annul_request(&mut self, request: RequestHandle) {
        self.dram.annul(request);
        for entry in &mut self.interconnects {
            match &mut entry.variant {
                InterconnectVariant::Switch(sw) => sw.annul(request),
                InterconnectVariant::Bus(bus) => bus.annul(request),
                InterconnectVariant::P2p(_) => {}
            }
        }
        let _ = self.chains.remove(&request);
    }

    /// Flushes a CPU controller's in-flight accesses, reporting the cycle
    /// cost the caller should charge.
    #[must_use]
    pub fn flush(&mut self, core: ControllerId) -> u64 {
        let ControllerVariant::Cpu(cpu) = &mut self.controllers[core.0 as usize].variant else {
            return 0;
        };
        let cost = cpu.flush_cost();
        cpu.flush();
        cost
    }
}

impl<P: RequestProducer> EventSink for MemoryHierarchy<P> {
    fn dispatch(&mut self, target: ComponentId, kind: EventKind, arg: EventArg) {
        match kind {
            EventKind::CacheAccess => {
                let at = controller_of(target);
                let Some(pending) = arg else { return };
                let now = self.events.now();
                let outcome = match &mut self.controllers[at.0 as usize].variant {
                    ControllerVariant::Cache(cache) => cache.cache_access(now, pending),
                    ControllerVariant::Cpu(_) => return,
                };
                match outcome {
                    CacheAccessOutcome::Hit => self.schedule(target, EventKind::CacheHit, 0, Some(pending)),
                    CacheAccessOutcome::Miss => self.schedule(target, EventKind::CacheMiss, 0, Some(pending)),
                }
            }
            EventKind::CacheHit => {
                let at = controller_of(target);
                let Some(pending) = arg else { return };
                let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
                    return;
                };
                let Some((request, addr, _, from_interconnect)) = cache.pending_snapshot(pending) else {
                    return;
                };
                let req_thread = self.requests.get(request).map_or(0, |r| r.thread_id);
                let thread_id = self.tsx_probe_thread(at, req_thread, from_interconnect);
                let tsx_active = self.tsx_active_for(at, thread_id);
                let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
                    return;
                };
                let (outcome, conflict) = cache.cache_hit(pending, thread_id, tsx_active);
                self.report_tsx_conflict(at, conflict);
                match outcome {
                    HitOutcome::Respond { shared, invalidate_sharers } => {
                        if from_interconnect {
                            self.stats.caches[at.0 as usize].interconn_hits += 1;
                        } else {
                            self.stats.caches[at.0 as usize].local_hits += 1;
                        }
                        if invalidate_sharers {
                            self.invalidate_other_sharers(at, addr, request);
                        } else {
                            self.sync_directory(at, addr);
                        }
                        if from_interconnect {
                            let _ = self.requests.release(request);
                        } else {
                            self.advance_chain(request, shared);
                        }
                    }
                    HitOutcome::RespondNoData | HitOutcome::Done => {
                        if from_interconnect {
                            self.stats.caches[at.0 as usize].interconn_hits += 1;
                        } else {
                            self.stats.caches[at.0 as usize].local_hits += 1;
                        }
                        self.sync_directory(at, addr);
                        if from_interconnect {
                            let _ = self.requests.release(request);
                        } else {
                            self.advance_chain(request, false);
                        }
                    }
                    HitOutcome::ForwardDown | HitOutcome::TreatAsMiss => {
                        self.schedule(target, EventKind::CacheMiss, 0, Some(pending));
                    }
                }
            }
            EventKind::CacheMiss => {
                let at = controller_of(target);
                let Some(pending) = arg else { return };
                let now = self.events.now();
                let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
                    return;
                };
                let Some((request, addr, _, from_interconnect)) = cache.pending_snapshot(pending) else {
                    return;
                };
                let req_thread = self.requests.get(request).map_or(0, |r| r.thread_id);
                let thread_id = self.tsx_probe_thread(at, req_thread, from_interconnect);
                let tsx_active = self.tsx_active_for(at, thread_id);
                let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
                    return;
                };
                let (outcome, conflict) = cache.cache_miss(now, pending, thread_id, tsx_active);
                self.report_tsx_conflict(at, conflict);
                match outcome {
                    MissOutcome::RespondNoData => {
                        self.stats.caches[at.0 as usize].interconn_misses += 1;
                        if from_interconnect {
                            let _ = self.requests.release(request);
                        } else {
                            self.advance_chain(request, false);
                        }
                    }
                    MissOutcome::PassThrough => {
                        self.forward_new_access(at, request, addr, OpType::Update);
                    }
                    MissOutcome::Forward { evicted, evicted_dirty } => {
                        self.stats.caches[at.0 as usize].local_misses += 1;
                        if let Some(evicted_addr) = evicted {
                            self.stats.caches[at.0 as usize].evictions += 1;
                            self.sync_directory(at, evicted_addr);
                            if evicted_dirty {
                                self.writeback(at, request, evicted_addr);
                            }
                        }
                        self.schedule(target, EventKind::WaitInterconnect, 0, Some(pending));
                    }
                }
            }
            EventKind::WaitInterconnect => {
                let at = controller_of(target);
                let Some(pending) = arg else { return };
                let ControllerVariant::Cache(cache) = &self.controllers[at.0 as usize].variant else {
                    return;
                };
                let Some((request, addr, op, _)) = cache.pending_snapshot(pending) else { return };
                self.chains.entry(request).or_default().push((at, pending));
                self.forward_new_access(at, request, addr, op);
            }
            EventKind::CacheInsert => {
                let at = controller_of(target);
                let Some(pending) = arg else { return };
                let shared = self.pending_shared.remove(&pending).unwrap_or(false);
                let ControllerVariant::Cache(cache) = &mut self.controllers[at.0 as usize].variant else {
                    return;
                };
                let complete = cache.complete_fill(pending, shared);
                let latency = cache.access_latency();
                for w in complete.woken {
                    self.schedule(ComponentId::Controller(at), EventKind::CacheAccess, latency, Some(w));
                }
                if let Some(req) = self.requests.get(complete.request) {
                    let addr = req.addr;
                    self.sync_directory(at, addr);
                }
                self.advance_chain(complete.request, shared);
            }
            EventKind::CpuAccessRetry | EventKind::CpuHandleResponse => {
                // CPU-side retries/wakeups are driven synchronously from
                // `respond`; nothing further to do here.
            }
            EventKind::SwitchSend => {
                let Some(handle) = arg else { return };
                let port = self.take_port_arg(handle);
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Switch(sw) = &mut self.interconnects[idx].variant else {
                    return;
                };
                let latency = sw.latency();
                let retry_latency = sw.retry_latency();
                let outcome = sw.send(port);
                match outcome {
                    SendOutcome::Idle => {}
                    SendOutcome::Retry => {
                        let arg = self.mint_port_arg(port);
                        self.schedule(target, EventKind::SwitchSend, retry_latency, Some(arg));
                    }
                    SendOutcome::Sending { .. } => {
                        let arg = self.mint_port_arg(port);
                        self.schedule(target, EventKind::SwitchSendComplete, latency, Some(arg));
                    }
                }
            }
            EventKind::SwitchSendComplete => {
                let Some(handle) = arg else { return };
                let port = self.take_port_arg(handle);
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Switch(sw) = &mut self.interconnects[idx].variant else {
                    return;
                };
                let outcome = sw.send_complete(port, true);
                match outcome {
                    SwitchCompleteOutcome::Accepted {
                        request,
                        destination,
                        ..
                    } => {
                        self.stats.interconnects[idx].delivered += 1;
                        let to = self.interconnects[idx].ports[destination].0;
                        if let Some(req) = self.requests.get(request) {
                            let (addr, op) = (req.addr, req.op);
                            self.deliver_new_access(to, request, addr, op, false);
                        }
                    }
                    SwitchCompleteOutcome::Refused => {
                        self.stats.interconnects[idx].retries += 1;
                    }
                }
                let arg = self.mint_port_arg(port);
                self.schedule(target, EventKind::SwitchSend, 1, Some(arg));
            }
            EventKind::BusBroadcast => {
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Bus(bus) = &mut self.interconnects[idx].variant else {
                    return;
                };
                let latency = bus.latency();
                let outcome = bus.broadcast(false, &[]);
                match outcome {
                    BroadcastOutcome::Idle => {}
                    BroadcastOutcome::Retry => {
                        self.stats.interconnects[idx].retries += 1;
                        self.schedule(target, EventKind::BusBroadcast, latency, None);
                    }
                    BroadcastOutcome::Advance { sender } => {
                        let arg = self.mint_port_arg(sender);
                        self.schedule(target, EventKind::BusBroadcastCompleted, latency, Some(arg));
                    }
                }
            }
            EventKind::BusBroadcastCompleted => {
                let Some(handle) = arg else { return };
                let sender = self.take_port_arg(handle);
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Bus(bus) = &mut self.interconnects[idx].variant else {
                    return;
                };
                let latency = bus.latency();
                let outcome = bus.broadcast_completed(sender, &[]);
                match outcome {
                    BroadcastCompletedOutcome::StillBlocked => {
                        let arg = self.mint_port_arg(sender);
                        self.schedule(target, EventKind::BusBroadcastCompleted, latency, Some(arg));
                    }
                    BroadcastCompletedOutcome::Completed {
                        request,
                        pending,
                        broadcast_to,
                        ..
                    } => {
                        self.stats.interconnects[idx].delivered += 1;
                        let from = self.interconnects[idx].ports[sender].0;
                        let from_role = self.interconnects[idx].ports[sender].1;
                        let Some(req) = self.requests.get(request) else {
                            self.schedule(target, EventKind::BusBroadcast, 1, None);
                            return;
                        };
                        let (addr, op) = (req.addr, req.op);
                        // Every target shares this one request handle; give
                        // each delivery past the first its own hold so that
                        // every independent completion's eventual release
                        // balances exactly one delivery.
                        for _ in 1..broadcast_to.len() {
                            self.requests.hold(request);
                        }
                        for &target_port in &broadcast_to {
                            let (to, to_role) = self.interconnects[idx].ports[target_port];
                            if to == from {
                                continue;
                            }
                            let from_interconnect = to_role == from_role;
                            self.deliver_new_access(to, request, addr, op, from_interconnect);
                        }
                        if let Some(pending) = pending {
                            self.schedule(target, EventKind::BusDataBroadcast, latency, Some(pending));
                        }
                        self.schedule(target, EventKind::BusBroadcast, 1, None);
                    }
                }
            }
            EventKind::BusDataBroadcast => {
                let Some(pending) = arg else { return };
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Bus(bus) = &mut self.interconnects[idx].variant else {
                    return;
                };
                if !bus.data_bus_busy() {
                    bus.start_data_broadcast(pending);
                }
                let latency = bus.latency();
                self.schedule(target, EventKind::BusDataBroadcastCompleted, latency, Some(pending));
            }
            EventKind::BusDataBroadcastCompleted => {
                let Some(pending) = arg else { return };
                let ic = interconnect_of(target);
                let idx = ic.0 as usize;
                let InterconnectVariant::Bus(bus) = &mut self.interconnects[idx].variant else {
                    return;
                };
                let _outcome = bus.data_broadcast_completed(pending);
                if let Some(next) = bus.next_ready_pending() {
                    bus.start_data_broadcast(next);
                    let latency = bus.latency();
                    self.schedule(target, EventKind::BusDataBroadcastCompleted, latency, Some(next));
                }
            }
            EventKind::DramComplete => {
                let Some(handle) = arg else { return };
                let outcome = self.dram.complete(handle);
                if let Some(next) = outcome.next_to_start {
                    let latency = self.dram.access_latency();
                    self.schedule(ComponentId::Dram(DramId(0)), EventKind::DramComplete, latency, Some(next));
                }
                if outcome.send_response {
                    self.advance_chain(outcome.request, false);
                } else {
                    let _ = self.requests.release(outcome.request);
                }
            }
        }
    }
}
