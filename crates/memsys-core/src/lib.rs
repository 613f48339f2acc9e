//! Event-driven memory hierarchy simulation core.
//!
//! This crate implements the timing and coherence model for a multi-level,
//! multi-core cache hierarchy: an arbitrary tree of coherent caches wired
//! together by point-to-point links, switches, and split-phase buses, backed
//! by a banked DRAM controller, all driven from a single global event queue.
//! It is the memory-side counterpart of a cycle-accurate full-system
//! simulator's core pipeline — it owns no ISA, no register file, and no
//! instruction stream; it answers exactly one question, "when does this
//! physical access complete, and in what coherence state," for every access
//! a driver hands it.
//!
//! 1. **Requests:** [`request`] — the `MemoryRequest` pool every component
//!    refers to by handle, plus the TSX region-control markers layered on
//!    top of ordinary loads and stores.
//! 2. **Events:** [`event`] — the global cycle counter and binary-heap event
//!    queue every component schedules its own follow-up work through.
//! 3. **Storage:** [`line`] and [`tlb`] — set-associative cache line arrays
//!    and a fully-associative TLB, both pure state with no scheduling of
//!    their own.
//! 4. **Coherence:** [`coherence`] — the MESI and MOESI transition tables a
//!    cache controller consults on every hit and miss, plus the MESI+TSX
//!    conflict-tracking overlay and the MOESI sharer directory.
//! 5. **Controllers:** [`controller`] — the CPU-side front end and the
//!    coherent cache controller, both data-only components that report an
//!    outcome and leave scheduling to [`hierarchy`].
//! 6. **Interconnects:** [`interconnect`] and [`message`] — point-to-point
//!    links, NxN switches, and split-phase buses, plus the short-lived
//!    message token they forward between controllers.
//! 7. **DRAM:** [`dram`] — the banked, queued memory controller every
//!    hierarchy eventually bottoms out at.
//! 8. **Assembly:** [`config`] and [`hierarchy`] — the serde-decoded machine
//!    description and the [`hierarchy::MemoryHierarchy`] facade that builds
//!    a live simulation from it and is the crate's sole [`event::EventSink`].
//! 9. **Observability:** [`stats`] — the plain counters every component
//!    bumps inline, read back once a run ends.
//!
//! Every component below [`hierarchy`] is deliberately data-only: none of
//! them touch [`event::EventQueue`] directly. Each reports what happened
//! through an outcome enum, and [`hierarchy::MemoryHierarchy`] — the crate's
//! only [`event::EventSink`] implementer — decides what event that outcome
//! calls for next. This keeps every timing decision in one place and leaves
//! every other module both synchronous and trivially unit-testable.

#![warn(missing_docs)]

/// Common types shared across the crate: addresses, the generation-checked
/// slab allocator, component identifiers, and build-time errors.
pub mod common;
/// Coherence transition tables (MESI, MOESI), the MESI+TSX overlay, and the
/// MOESI sharer directory.
pub mod coherence;
/// Machine description: the serde-decoded tree a `MemoryHierarchy` is built
/// from.
pub mod config;
/// CPU-side and coherent-cache controllers.
pub mod controller;
/// The banked DRAM controller every hierarchy bottoms out at.
pub mod dram;
/// The global cycle counter and event queue every component schedules
/// follow-up work through.
pub mod event;
/// Facade assembling controllers, interconnects, and DRAM into a live,
/// event-driven simulation.
pub mod hierarchy;
/// Point-to-point, switch, and bus interconnect fabrics.
pub mod interconnect;
/// Set-associative cache line storage.
pub mod line;
/// The short-lived message token forwarded between controllers over an
/// interconnect.
pub mod message;
/// The `MemoryRequest` pool and TSX region-control markers.
pub mod request;
/// Per-component counters read back once a simulation run ends.
pub mod stats;
/// Fully-associative TLB.
pub mod tlb;

pub use crate::common::{BuildError, PhysAddr};
pub use crate::config::MachineConfig;
pub use crate::hierarchy::{MemoryHierarchy, RequestProducer};
pub use crate::request::{MemoryRequest, OpType, RequestHandle};
pub use crate::stats::Stats;
