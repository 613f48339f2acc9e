//! Physical address type and line/set/tag decomposition.
//!
//! This module defines a strong type for physical addresses (the core never
//! models virtual memory beyond the TLB's tag, so there is no `VirtAddr`
//! counterpart) and the bit arithmetic every set-associative structure
//! (cache line array, directory) needs to turn an address into a line
//! address, a set index, and a tag.

/// A physical address. Cache lines carry only tag and state — never
/// payload — so this is the only address representation the core needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Wraps a raw 64-bit address.
    #[inline(always)]
    #[must_use]
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit value.
    #[inline(always)]
    #[must_use]
    pub fn val(self) -> u64 {
        self.0
    }

    /// Rounds this address down to the start of its containing cache line.
    #[inline]
    #[must_use]
    pub fn line_base(self, line_bytes: usize) -> Self {
        Self(self.0 & !(line_bytes as u64 - 1))
    }
}

/// Decomposes an address into `(set_index, tag)` for a cache with the given
/// geometry. `line_bytes` and `num_sets` must both be powers of two.
#[inline]
#[must_use]
pub fn set_and_tag(addr: PhysAddr, line_bytes: usize, num_sets: usize) -> (usize, u64) {
    let line_addr = addr.0 / line_bytes as u64;
    let set_index = (line_addr as usize) & (num_sets - 1);
    let tag = line_addr / num_sets as u64;
    (set_index, tag)
}

/// Reconstructs the line-base address from a `(set_index, tag)` pair for a
/// cache with the given geometry. Inverse of [`set_and_tag`] on a line-base
/// address.
#[inline]
#[must_use]
pub fn line_addr_from_set_tag(set_index: usize, tag: u64, line_bytes: usize, num_sets: usize) -> u64 {
    (tag * num_sets as u64 + set_index as u64) * line_bytes as u64
}
