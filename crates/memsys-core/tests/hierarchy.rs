//! End-to-end scenarios driving `MemoryHierarchy` through a small two-level
//! machine description, the way an embedding core simulator would.

use memsys_core::coherence;
use memsys_core::common::PhysAddr;
use memsys_core::config::{
    CacheConfig, ConnectionConfig, ControllerConfig, ControllerKindConfig, InterconnectConfig, InterconnectKindConfig,
    MachineConfig, ProtocolConfig, Role,
};
use memsys_core::dram::DramParams;
use memsys_core::hierarchy::{MemoryHierarchy, RequestProducer};
use memsys_core::request::OpType;

/// Records every wakeup/abort callback so a test can assert on it after the
/// fact instead of racing a live core.
#[derive(Default)]
struct Recorder {
    wakeups: Vec<(u32, u32)>,
    icache_wakeups: Vec<(u32, u32)>,
    aborts: Vec<(u32, u32)>,
}

impl RequestProducer for Recorder {
    fn wakeup(&mut self, core_id: u32, rob_id: u32) {
        self.wakeups.push((core_id, rob_id));
    }

    fn icache_wakeup(&mut self, core_id: u32, rob_id: u32) {
        self.icache_wakeups.push((core_id, rob_id));
    }

    fn tsx_abort(&mut self, core_id: u32, thread_id: u32) {
        self.aborts.push((core_id, thread_id));
    }
}

fn cache_config(name: &str, is_lowest_private: bool, connects_to_dram: bool) -> ControllerConfig {
    ControllerConfig {
        name: name.to_string(),
        kind: ControllerKindConfig::Cache(CacheConfig {
            num_sets: 64,
            ways: 4,
            line_bytes: 64,
            read_ports: 2,
            write_ports: 1,
            access_latency: 4,
            pending_capacity: 8,
            interconnect_reserve: 2,
            protocol: ProtocolConfig::Mesi,
            is_lowest_private,
            connects_to_dram,
        }),
    }
}

/// One core, one private L1, backed directly by DRAM through a P2P link.
fn one_level_machine() -> MachineConfig {
    MachineConfig {
        controllers: vec![
            ControllerConfig {
                name: "core0".into(),
                kind: ControllerKindConfig::Cpu {
                    pending_capacity: 16,
                    line_bytes: 64,
                    tlb_capacity: 32,
                },
            },
            cache_config("l1_0", true, true),
        ],
        interconnects: vec![InterconnectConfig {
            name: "core0_l1".into(),
            kind: InterconnectKindConfig::P2p,
        }],
        connections: vec![
            ConnectionConfig {
                controller: "core0".into(),
                interconnect: "core0_l1".into(),
                role: Role::Lower,
            },
            ConnectionConfig {
                controller: "l1_0".into(),
                interconnect: "core0_l1".into(),
                role: Role::Upper,
            },
        ],
        dram: DramParams {
            banks: 4,
            access_latency: 100,
            queue_capacity: 16,
        },
    }
}

/// Two cores, each with a private L1, sharing an L2 over a bus, with the L2
/// wired directly to DRAM.
fn two_level_bus_machine() -> MachineConfig {
    MachineConfig {
        controllers: vec![
            ControllerConfig {
                name: "core0".into(),
                kind: ControllerKindConfig::Cpu {
                    pending_capacity: 16,
                    line_bytes: 64,
                    tlb_capacity: 32,
                },
            },
            ControllerConfig {
                name: "core1".into(),
                kind: ControllerKindConfig::Cpu {
                    pending_capacity: 16,
                    line_bytes: 64,
                    tlb_capacity: 32,
                },
            },
            cache_config("l1_0", true, false),
            cache_config("l1_1", true, false),
            cache_config("l2", false, true),
        ],
        interconnects: vec![
            InterconnectConfig {
                name: "core0_l1".into(),
                kind: InterconnectKindConfig::P2p,
            },
            InterconnectConfig {
                name: "core1_l1".into(),
                kind: InterconnectKindConfig::P2p,
            },
            InterconnectConfig {
                name: "l1_l2_bus".into(),
                kind: InterconnectKindConfig::Bus {
                    latency: 3,
                    arbitrate_latency: 1,
                    queue_size: 4,
                },
            },
        ],
        connections: vec![
            ConnectionConfig {
                controller: "core0".into(),
                interconnect: "core0_l1".into(),
                role: Role::Lower,
            },
            ConnectionConfig {
                controller: "l1_0".into(),
                interconnect: "core0_l1".into(),
                role: Role::Upper,
            },
            ConnectionConfig {
                controller: "core1".into(),
                interconnect: "core1_l1".into(),
                role: Role::Lower,
            },
            ConnectionConfig {
                controller: "l1_1".into(),
                interconnect: "core1_l1".into(),
                role: Role::Upper,
            },
            ConnectionConfig {
                controller: "l1_0".into(),
                interconnect: "l1_l2_bus".into(),
                role: Role::Lower,
            },
            ConnectionConfig {
                controller: "l1_1".into(),
                interconnect: "l1_l2_bus".into(),
                role: Role::Lower,
            },
            ConnectionConfig {
                controller: "l2".into(),
                interconnect: "l1_l2_bus".into(),
                role: Role::Upper,
            },
        ],
        dram: DramParams {
            banks: 4,
            access_latency: 100,
            queue_capacity: 16,
        },
    }
}

fn run_until_idle(hierarchy: &mut MemoryHierarchy<Recorder>, max_cycles: u64) {
    for _ in 0..max_cycles {
        hierarchy.clock();
    }
}

/// Overrides a single named cache controller's protocol in an
/// already-built [`MachineConfig`], for scenarios that need MOESI or
/// MESI+TSX on top of [`one_level_machine`]/[`two_level_bus_machine`]'s
/// otherwise-plain-MESI layout.
fn with_protocol(mut config: MachineConfig, name: &str, protocol: ProtocolConfig) -> MachineConfig {
    for c in &mut config.controllers {
        if c.name == name {
            if let ControllerKindConfig::Cache(cache) = &mut c.kind {
                cache.protocol = protocol;
            }
        }
    }
    config
}

/// One core, one private L1 with only 2 ways per set, directly over DRAM —
/// small enough that a handful of accesses to the same set force an
/// eviction.
fn two_way_one_level_machine() -> MachineConfig {
    let mut config = one_level_machine();
    if let ControllerKindConfig::Cache(cache) = &mut config.controllers[1].kind {
        cache.num_sets = 4;
        cache.ways = 2;
    }
    config
}

#[test]
fn cold_read_misses_all_the_way_to_dram_and_wakes_the_core() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    let issued = hierarchy.cpu_access(core0, PhysAddr::new(0x1000), OpType::Read, 0, 7, 1, 0, false, false);
    assert!(issued);

    run_until_idle(&mut hierarchy, 200);

    assert_eq!(hierarchy.producer().wakeups, vec![(0, 7)]);
    assert_eq!(hierarchy.stats().caches[1].local_misses, 1);
    assert_eq!(hierarchy.stats().dram.accesses, 1);
}

#[test]
fn second_access_to_a_warm_line_hits_locally() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    hierarchy.cpu_access(core0, PhysAddr::new(0x2000), OpType::Read, 0, 1, 1, 0, false, false);
    run_until_idle(&mut hierarchy, 200);

    hierarchy.cpu_access(core0, PhysAddr::new(0x2000), OpType::Read, 0, 2, 2, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 50);

    assert_eq!(hierarchy.producer().wakeups, vec![(0, 1), (0, 2)]);
    assert_eq!(hierarchy.stats().caches[1].local_hits, 1);
    assert_eq!(hierarchy.stats().dram.accesses, 1, "second access must not requeue DRAM");
}

#[test]
fn instruction_fetch_uses_the_icache_wakeup_path() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    hierarchy.cpu_access(core0, PhysAddr::new(0x4000), OpType::Read, 0, 3, 1, 0, true, false);
    run_until_idle(&mut hierarchy, 200);

    assert_eq!(hierarchy.producer().icache_wakeups, vec![(0, 3)]);
    assert!(hierarchy.producer().wakeups.is_empty());
}

#[test]
fn two_cores_sharing_an_l2_over_a_bus_both_get_serviced() {
    let mut hierarchy = MemoryHierarchy::build(&two_level_bus_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let core1 = hierarchy.controller_id("core1").unwrap();

    hierarchy.cpu_access(core0, PhysAddr::new(0x8000), OpType::Read, 0, 1, 1, 0, false, false);
    hierarchy.cpu_access(core1, PhysAddr::new(0x9000), OpType::Read, 0, 1, 1, 0, false, false);
    run_until_idle(&mut hierarchy, 400);

    let recorder = hierarchy.producer();
    assert!(recorder.wakeups.contains(&(0, 1)));
    assert!(recorder.wakeups.contains(&(1, 1)));
    assert_eq!(hierarchy.stats().dram.accesses, 2);
}

#[test]
fn tsx_begin_and_end_resolve_synchronously_without_touching_dram() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    let began = hierarchy.cpu_access(
        core0,
        PhysAddr::new(0),
        OpType::Tsx(memsys_core::request::TsxMarker::Begin),
        0,
        0,
        1,
        0,
        false,
        false,
    );
    assert!(began);
    let ended = hierarchy.cpu_access(
        core0,
        PhysAddr::new(0),
        OpType::Tsx(memsys_core::request::TsxMarker::End),
        0,
        1,
        2,
        0,
        false,
        false,
    );
    assert!(ended);

    assert_eq!(hierarchy.producer().wakeups, vec![(0, 0), (0, 1)]);
    assert_eq!(hierarchy.stats().dram.accesses, 0);
}

#[test]
fn tsx_abort_notifies_the_producer() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    hierarchy.cpu_access(
        core0,
        PhysAddr::new(0),
        OpType::Tsx(memsys_core::request::TsxMarker::Begin),
        3,
        0,
        1,
        0,
        false,
        false,
    );
    hierarchy.cpu_access(
        core0,
        PhysAddr::new(0),
        OpType::Tsx(memsys_core::request::TsxMarker::Abort),
        3,
        1,
        2,
        0,
        false,
        false,
    );

    assert_eq!(hierarchy.producer().aborts, vec![(0, 3)]);
}

#[test]
fn duplicate_controller_names_are_rejected_at_build_time() {
    let mut config = one_level_machine();
    config.controllers[1].name = "core0".into();
    let err = MemoryHierarchy::build(&config, Recorder::default()).unwrap_err();
    assert!(matches!(err, memsys_core::BuildError::DuplicateName(name) if name == "core0"));
}

#[test]
fn a_controller_wired_to_nothing_fails_the_build() {
    let mut config = one_level_machine();
    config.connections.clear();
    let err = MemoryHierarchy::build(&config, Recorder::default()).unwrap_err();
    assert!(matches!(err, memsys_core::BuildError::UnconnectedController(_)));
}

#[test]
fn flush_reports_a_nonzero_cost_with_in_flight_accesses() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();

    hierarchy.cpu_access(core0, PhysAddr::new(0x1000), OpType::Read, 0, 1, 1, 0, false, false);
    let cost = hierarchy.flush(core0);
    assert!(cost > 0);
}

/// S3: a dirty eviction sends one write-back downstream and DRAM sees it.
#[test]
fn evicting_a_modified_line_sends_a_write_back_to_dram() {
    let mut hierarchy = MemoryHierarchy::build(&two_way_one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let l1 = hierarchy.controller_id("l1_0").unwrap();

    // 0x4000, 0x4100, 0x4200 all map to the same set in a 4-set cache.
    hierarchy.cpu_access(core0, PhysAddr::new(0x4000), OpType::Write, 0, 1, 1, 0, false, false);
    run_until_idle(&mut hierarchy, 200);
    hierarchy.cpu_access(core0, PhysAddr::new(0x4100), OpType::Read, 0, 2, 2, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 200);
    // Both ways of the set are now occupied (0x4000 dirty, 0x4100 clean);
    // this third distinct tag evicts one of them.
    hierarchy.cpu_access(core0, PhysAddr::new(0x4200), OpType::Read, 0, 3, 3, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 200);

    assert_eq!(hierarchy.stats().caches[l1.0 as usize].evictions, 1);
    // Fill, fill, fill, plus exactly one write-back.
    assert_eq!(hierarchy.stats().dram.accesses, 4);
    assert_eq!(hierarchy.producer().wakeups.len(), 3);
}

/// S4: a peer's write snoop-hits and invalidates the other core's copy.
#[test]
fn a_peer_write_invalidates_the_other_cores_copy_over_the_bus() {
    let mut hierarchy = MemoryHierarchy::build(&two_level_bus_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let core1 = hierarchy.controller_id("core1").unwrap();
    let l1_0 = hierarchy.controller_id("l1_0").unwrap();
    let l1_1 = hierarchy.controller_id("l1_1").unwrap();
    let addr = PhysAddr::new(0x8000);

    hierarchy.cpu_access(core0, addr, OpType::Read, 0, 1, 1, 0, false, false);
    run_until_idle(&mut hierarchy, 400);
    assert_eq!(hierarchy.peek_cache_state(l1_0, addr), Some(coherence::E));

    hierarchy.cpu_access(core1, addr, OpType::Write, 0, 1, 2, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);

    assert_eq!(hierarchy.peek_cache_state(l1_0, addr), Some(coherence::I));
    assert_eq!(hierarchy.peek_cache_state(l1_1, addr), Some(coherence::M));
    assert_eq!(hierarchy.stats().caches[l1_0.0 as usize].interconn_hits, 1);
}

/// A MOESI lowest-private write hit that promotes `O` to `M` must
/// invalidate every other sharer the directory knows about first, not
/// just transition its own line.
#[test]
fn moesi_owner_to_modified_promotion_invalidates_directory_sharers() {
    let mut config = two_level_bus_machine();
    config = with_protocol(config, "l1_0", ProtocolConfig::Moesi);
    config = with_protocol(config, "l1_1", ProtocolConfig::Moesi);
    config = with_protocol(config, "l2", ProtocolConfig::Moesi);
    let mut hierarchy = MemoryHierarchy::build(&config, Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let core1 = hierarchy.controller_id("core1").unwrap();
    let l1_0 = hierarchy.controller_id("l1_0").unwrap();
    let l1_1 = hierarchy.controller_id("l1_1").unwrap();
    let addr = PhysAddr::new(0xA000);

    hierarchy.cpu_access(core0, addr, OpType::Write, 0, 1, 1, 0, false, false);
    run_until_idle(&mut hierarchy, 400);
    assert_eq!(hierarchy.peek_cache_state(l1_0, addr), Some(coherence::M));

    // core1's read snoop-hits l1_0's Modified line, demoting it to Owner
    // and registering core1 as a sharer in the directory.
    hierarchy.cpu_access(core1, addr, OpType::Read, 0, 1, 2, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);
    assert_eq!(hierarchy.peek_cache_state(l1_0, addr), Some(coherence::O));

    // core0 writes again: the directory must invalidate l1_1's sharer copy
    // before l1_0 can claim Modified.
    hierarchy.cpu_access(core0, addr, OpType::Write, 0, 2, 3, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);

    assert_eq!(hierarchy.peek_cache_state(l1_0, addr), Some(coherence::M));
    assert_eq!(hierarchy.peek_cache_state(l1_1, addr), Some(coherence::I));
}

/// S5: three back-to-back reads to the same cold line from one core
/// collapse into a single downstream request, and every one of them
/// wakes once it completes.
#[test]
fn three_back_to_back_reads_to_the_same_line_dedupe_into_one_request() {
    let mut hierarchy = MemoryHierarchy::build(&one_level_machine(), Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let addr = PhysAddr::new(0xC000);

    assert!(hierarchy.cpu_access(core0, addr, OpType::Read, 0, 10, 1, 0, false, false));
    assert!(hierarchy.cpu_access(core0, addr, OpType::Read, 0, 11, 2, 0, false, false));
    assert!(hierarchy.cpu_access(core0, addr, OpType::Read, 0, 12, 3, 0, false, false));

    run_until_idle(&mut hierarchy, 200);

    assert_eq!(hierarchy.producer().wakeups, vec![(0, 10), (0, 11), (0, 12)]);
    assert_eq!(hierarchy.stats().dram.accesses, 1, "riders must not re-issue downstream");
}

/// S6: a peer's write snoop aborts an open TSX transaction that has
/// reserved the line it hits.
#[test]
fn a_peer_write_snoop_aborts_an_open_tsx_transaction() {
    let mut config = two_level_bus_machine();
    config = with_protocol(config, "l1_0", ProtocolConfig::MesiTsx);
    config = with_protocol(config, "l1_1", ProtocolConfig::MesiTsx);
    let mut hierarchy = MemoryHierarchy::build(&config, Recorder::default()).unwrap();
    let core0 = hierarchy.controller_id("core0").unwrap();
    let core1 = hierarchy.controller_id("core1").unwrap();
    let addr = PhysAddr::new(0xE000);

    hierarchy.cpu_access(
        core0,
        PhysAddr::new(0),
        OpType::Tsx(memsys_core::request::TsxMarker::Begin),
        0,
        0,
        1,
        0,
        false,
        false,
    );

    // First touch: a cold miss, no TSX tag applied to the install itself.
    hierarchy.cpu_access(core0, addr, OpType::Read, 0, 1, 2, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);
    // Second touch: a local hit, which is where the overlay gets applied.
    hierarchy.cpu_access(core0, addr, OpType::Read, 0, 2, 3, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);

    hierarchy.cpu_access(core1, addr, OpType::Write, 1, 0, 4, hierarchy.now(), false, false);
    run_until_idle(&mut hierarchy, 400);

    assert_eq!(hierarchy.producer().aborts, vec![(0, 0)]);
}
