//! Machine description: the serde-decoded tree a
//! [`crate::hierarchy::MemoryHierarchy`] is built from (spec §9).
//!
//! Shaped after a topology description rather than a flat parameter list so
//! a test or a driver binary can describe an arbitrary cache hierarchy —
//! core count, level count, fabric choice — as data instead of Rust code.

use serde::{Deserialize, Serialize};

use crate::coherence::Protocol;
use crate::dram::DramParams;

/// A complete machine description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Every controller in the hierarchy, CPU-side and cache.
    pub controllers: Vec<ControllerConfig>,
    /// Every interconnect fabric.
    pub interconnects: Vec<InterconnectConfig>,
    /// Edges wiring controllers to interconnects.
    pub connections: Vec<ConnectionConfig>,
    /// The singleton DRAM controller's parameters.
    pub dram: DramParams,
}

/// One controller's name and kind-specific parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Unique name, referenced by [`ConnectionConfig`].
    pub name: String,
    /// CPU front end or coherent cache.
    pub kind: ControllerKindConfig,
}

/// Which kind of controller a [`ControllerConfig`] builds, with its
/// kind-specific parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerKindConfig {
    /// A CPU-side front end (spec §4.4).
    Cpu {
        /// Per-core pending-access table size.
        pending_capacity: usize,
        /// Cache line size this core's accesses are grouped by.
        line_bytes: usize,
        /// TLB capacity.
        tlb_capacity: usize,
    },
    /// A coherent cache level (spec §4.5).
    Cache(CacheConfig),
}

/// Parameters for a coherent cache controller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of sets.
    pub num_sets: usize,
    /// Associativity.
    pub ways: usize,
    /// Line size in bytes.
    pub line_bytes: usize,
    /// Read ports per cycle.
    pub read_ports: u32,
    /// Write ports per cycle.
    pub write_ports: u32,
    /// Cycles from access start to hit/miss classification.
    pub access_latency: u64,
    /// Total pending-table slots.
    pub pending_capacity: usize,
    /// Slots reserved for interconnect-originated accesses.
    pub interconnect_reserve: usize,
    /// Coherence protocol.
    pub protocol: ProtocolConfig,
    /// Whether this is the lowest private cache for its core.
    pub is_lowest_private: bool,
    /// Whether this controller connects directly to DRAM rather than
    /// forwarding misses through a lower interconnect.
    pub connects_to_dram: bool,
}

/// Coherence protocol selection. `MesiTsx` builds a plain
/// [`Protocol::Mesi`] controller with the TSX overlay enabled — see
/// [`crate::coherence::tsx`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolConfig {
    /// Plain MESI.
    Mesi,
    /// MOESI with a sharer directory.
    Moesi,
    /// MESI plus the TSX conflict-tracking overlay.
    MesiTsx,
}

impl ProtocolConfig {
    /// The base [`Protocol`] this selection builds.
    #[must_use]
    pub fn protocol(self) -> Protocol {
        match self {
            ProtocolConfig::Mesi | ProtocolConfig::MesiTsx => Protocol::Mesi,
            ProtocolConfig::Moesi => Protocol::Moesi,
        }
    }

    /// Whether the TSX overlay should be enabled on top of [`Self::protocol`].
    #[must_use]
    pub fn tsx_enabled(self) -> bool {
        matches!(self, ProtocolConfig::MesiTsx)
    }
}

/// One interconnect fabric's name and kind-specific parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterconnectConfig {
    /// Unique name, referenced by [`ConnectionConfig`].
    pub name: String,
    /// Fabric kind and its parameters.
    pub kind: InterconnectKindConfig,
}

/// Which fabric kind an [`InterconnectConfig`] builds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterconnectKindConfig {
    /// A point-to-point link (spec §4.8); exactly two endpoints.
    P2p,
    /// An NxN switch (spec §4.9).
    Switch {
        /// Cycles from a claimed destination to delivery.
        latency: u64,
        /// Cycles before retrying a blocked or refused send.
        retry_latency: u64,
    },
    /// A split-phase shared bus (spec §4.10).
    Bus {
        /// Cycles from arbitration winning to broadcast completion.
        latency: u64,
        /// Cycles between arbitration attempts.
        arbitrate_latency: u64,
        /// Per-port address-phase queue depth.
        queue_size: usize,
    },
}

/// Which side of a controller a [`ConnectionConfig`] attaches an
/// interconnect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The interconnect is how requests arrive from above (a CPU, or a
    /// more-private cache level).
    Upper,
    /// The interconnect is how requests are forwarded below (toward DRAM).
    Lower,
}

/// One edge wiring a named controller to a named interconnect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// The controller's name.
    pub controller: String,
    /// The interconnect's name.
    pub interconnect: String,
    /// Which side of the controller this edge represents.
    pub role: Role,
}
