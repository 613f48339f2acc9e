//! Component identifiers.
//!
//! The facade addresses every controller, interconnect, and DRAM bank by a
//! small `Copy` id rather than a name string or a trait-object pointer, so
//! that a scheduled [`crate::event::Event`] can name its target without
//! borrowing the component itself. Names (from the machine description) are
//! resolved to these ids once, at build time.

/// Identifies a controller (CPU-side or coherent cache) within a
/// [`crate::hierarchy::MemoryHierarchy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub u32);

/// Identifies an interconnect (p2p, bus, or switch) within a
/// [`crate::hierarchy::MemoryHierarchy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterconnectId(pub u32);

/// Identifies the (singleton, in this crate) DRAM controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DramId(pub u32);

/// The target of a scheduled [`crate::event::Event`]: which component's
/// dispatch table the event's `kind` should be looked up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentId {
    /// A controller (CPU-side front end or coherent cache).
    Controller(ControllerId),
    /// An interconnect fabric.
    Interconnect(InterconnectId),
    /// The DRAM controller.
    Dram(DramId),
}
