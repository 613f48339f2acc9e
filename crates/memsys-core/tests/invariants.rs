//! Property tests pinning the coherence invariants spec §8 calls out:
//! same-line accesses serialize, and at most one cache ever holds a line
//! exclusively (`E`/`M`) while any other cache holds a valid copy of it.
//! Driven by `proptest` over randomized Read/Write sequences from two
//! cores sharing an L2 over a bus, rather than hand-picked scenarios.

use memsys_core::coherence;
use memsys_core::common::PhysAddr;
use memsys_core::config::{
    CacheConfig, ConnectionConfig, ControllerConfig, ControllerKindConfig, InterconnectConfig, InterconnectKindConfig,
    MachineConfig, ProtocolConfig, Role,
};
use memsys_core::dram::DramParams;
use memsys_core::hierarchy::{MemoryHierarchy, RequestProducer};
use memsys_core::request::OpType;
use proptest::prelude::*;

#[derive(Default)]
struct NullProducer;

impl RequestProducer for NullProducer {
    fn wakeup(&mut self, _core_id: u32, _rob_id: u32) {}
}

fn cache_config(name: &str, is_lowest_private: bool, connects_to_dram: bool) -> ControllerConfig {
    ControllerConfig {
        name: name.to_string(),
        kind: ControllerKindConfig::Cache(CacheConfig {
            num_sets: 4,
            ways: 2,
            line_bytes: 64,
            read_ports: 2,
            write_ports: 1,
            access_latency: 2,
            pending_capacity: 8,
            interconnect_reserve: 2,
            protocol: ProtocolConfig::Mesi,
            is_lowest_private,
            connects_to_dram,
        }),
    }
}

/// Two cores, private L1s, shared L2 over a bus — small enough that a
/// short random sequence still forces evictions and cross-core snoops.
fn two_cores_one_l2() -> MachineConfig {
    MachineConfig {
        controllers: vec![
            ControllerConfig {
                name: "core0".into(),
                kind: ControllerKindConfig::Cpu {
                    pending_capacity: 8,
                    line_bytes: 64,
                    tlb_capacity: 8,
                },
            },
            ControllerConfig {
                name: "core1".into(),
                kind: ControllerKindConfig::Cpu {
                    pending_capacity: 8,
                    line_bytes: 64,
                    tlb_capacity: 8,
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
                    latency: 2,
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
            banks: 2,
            access_latency: 20,
            queue_capacity: 8,
        },
    }
}

/// At most one cache may hold `addr` exclusively (`E`/`M`) while any other
/// cache holds a valid copy of the same line.
fn assert_exclusivity_holds(hierarchy: &MemoryHierarchy<NullProducer>, addr: PhysAddr) {
    let states: Vec<u8> = hierarchy
        .cache_controller_ids()
        .into_iter()
        .filter_map(|id| hierarchy.peek_cache_state(id, addr))
        .map(coherence::base_state)
        .filter(|&s| s != coherence::I)
        .collect();

    let exclusive_holders = states.iter().filter(|&&s| s == coherence::E || s == coherence::M).count();
    if exclusive_holders > 0 {
        assert_eq!(
            exclusive_holders, 1,
            "at most one cache may hold {addr:?} exclusively, found states {states:?}"
        );
        assert_eq!(
            states.len(),
            1,
            "an exclusive holder of {addr:?} must be the only cache with a valid copy, found {states:?}"
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct Op {
    core: bool,
    write: bool,
    offset: u64,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (any::<bool>(), any::<bool>(), 0u64..3).prop_map(|(core, write, offset)| Op { core, write, offset })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_access_sequences_never_violate_exclusivity(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let mut hierarchy = MemoryHierarchy::build(&two_cores_one_l2(), NullProducer).unwrap();
        let core0 = hierarchy.controller_id("core0").unwrap();
        let core1 = hierarchy.controller_id("core1").unwrap();
        let addr = PhysAddr::new(0x1000);

        for (i, op) in ops.into_iter().enumerate() {
            let core = if op.core { core1 } else { core0 };
            let kind = if op.write { OpType::Write } else { OpType::Read };
            let target = PhysAddr::new(addr.0 + op.offset * 64);
            let now = hierarchy.now();
            hierarchy.cpu_access(core, target, kind, 0, i as u32, i as u64, now, false, false);

            for _ in 0..64 {
                hierarchy.clock();
            }
            assert_exclusivity_holds(&hierarchy, target);
        }
    }
}
