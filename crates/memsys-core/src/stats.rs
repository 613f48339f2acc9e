//! Per-component counters (spec §9's logging/observability supplement).
//!
//! Every counter here is a plain `u64` bumped inline by the component that
//! owns the event it counts — no sampling, no histogram buckets, matching
//! the core's non-goals around performance-model fidelity. A driver binary
//! reads these back through [`crate::hierarchy::MemoryHierarchy::stats`]
//! once the run ends.

/// Counters for one [`crate::controller::cache::CacheController`].
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct CacheStats {
    /// Local (CPU/upper-cache-originated) accesses that hit.
    pub local_hits: u64,
    /// Local accesses that missed.
    pub local_misses: u64,
    /// Interconnect-originated accesses (snoops) that hit.
    pub interconn_hits: u64,
    /// Interconnect-originated accesses that missed.
    pub interconn_misses: u64,
    /// Lines evicted to make room for a miss.
    pub evictions: u64,
    /// Accesses rejected for lack of a pending-table slot.
    pub back_pressure_drops: u64,
}

impl CacheStats {
    /// Hits as a fraction of all local accesses, `0.0` with no traffic.
    #[must_use]
    pub fn local_hit_rate(&self) -> f64 {
        let total = self.local_hits + self.local_misses;
        if total == 0 {
            0.0
        } else {
            self.local_hits as f64 / total as f64
        }
    }
}

/// Counters for the [`crate::dram::DramController`].
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct DramStats {
    /// Accesses admitted to a bank.
    pub accesses: u64,
    /// Update (write-back) requests merged into an already-queued entry.
    pub merges: u64,
    /// Accesses rejected for lack of queue capacity.
    pub queue_full_drops: u64,
}

/// Counters for one interconnect fabric, regardless of kind.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct InterconnectStats {
    /// Messages that completed a send/broadcast successfully.
    pub delivered: u64,
    /// Sends or broadcasts that had to retry against a busy peer.
    pub retries: u64,
    /// Requests rejected for lack of queue capacity.
    pub queue_full_drops: u64,
}

/// The full set of counters a [`crate::hierarchy::MemoryHierarchy`] tracks,
/// indexed in build order alongside its component vectors.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Stats {
    /// One entry per cache controller, in build order.
    pub caches: Vec<CacheStats>,
    /// One entry per interconnect, in build order.
    pub interconnects: Vec<InterconnectStats>,
    /// The singleton DRAM controller's counters.
    pub dram: DramStats,
}
