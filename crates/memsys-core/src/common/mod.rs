//! Common types shared across the memory hierarchy core: addresses, the
//! generic slab allocator, and build-time error types.

/// Physical address type and set/tag decomposition helpers.
pub mod addr;
/// Build-time error types (`BuildError`); nothing on the request hot path
/// is fallible, per the error-handling design.
pub mod error;
/// Component identifiers (`ControllerId`, `InterconnectId`, `ComponentId`).
pub mod ids;
/// Generation-checked slab allocator backing every pool/table in the crate.
pub mod slab;

pub use addr::PhysAddr;
pub use error::BuildError;
pub use ids::{ComponentId, ControllerId, DramId, InterconnectId};
pub use slab::{Slab, SlabIndex};
