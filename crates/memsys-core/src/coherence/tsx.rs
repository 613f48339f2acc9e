//! MESI+TSX overlay (spec §4.6.3).
//!
//! TSX is not a fourth [`super::Protocol`] variant: a controller configured
//! for it still runs plain MESI transitions and additionally tags two spare
//! bits on the line state byte to record whether the current transaction
//! has read or written the line, then watches for the two events that
//! invalidate those reservations — an eviction of a tagged line, or a
//! snoop hitting one. Either is reported back to the controller as a
//! [`Conflict`], which it turns into a `tsx_abort` callback to the
//! producer that owns the transaction; this module only detects the
//! conflict; the architectural rollback is out of scope here (the core
//! pipeline and register file are a producer-side concern).

/// The transaction has read this line since entering TSX mode, and expects
/// no other core to write it before the transaction completes.
pub const TM_READ: u8 = 0x08;
/// The transaction has written this line since entering TSX mode, and
/// expects no other core to read or write it before the transaction
/// completes.
pub const TM_WRITE: u8 = 0x10;

const OVERLAY_MASK: u8 = TM_READ | TM_WRITE;

/// Strips the TSX overlay from a line state byte.
#[must_use]
pub fn clear(line_state: u8) -> u8 {
    line_state & !OVERLAY_MASK
}

/// Whether either overlay bit is set.
#[must_use]
pub fn is_tracked(line_state: u8) -> bool {
    line_state & OVERLAY_MASK != 0
}

/// Tags a line as read by the in-flight transaction.
#[must_use]
pub fn mark_read(line_state: u8) -> u8 {
    line_state | TM_READ
}

/// Tags a line as written by the in-flight transaction.
#[must_use]
pub fn mark_write(line_state: u8) -> u8 {
    line_state | TM_WRITE
}

/// Why a transaction aborted, for the producer's `tsx_abort` callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    /// A tracked line had to be evicted from this cache to make room for
    /// something else; its read/write reservation cannot survive that.
    Eviction,
    /// A peer's read or write snoop hit a line this transaction had
    /// written, or a peer's write snoop hit a line this transaction had
    /// only read — either way the reservation is broken.
    Snoop,
}

/// Checks whether evicting a tracked line conflicts with an open
/// transaction. Evicting an untracked line, or one with no transaction
/// active, is never a conflict.
#[must_use]
pub fn check_eviction(line_state: u8, tsx_active: bool) -> Option<Conflict> {
    if tsx_active && is_tracked(line_state) {
        Some(Conflict::Eviction)
    } else {
        None
    }
}

/// Checks whether a snoop `op` against a tracked line conflicts with an
/// open transaction: a peer write always conflicts with any reservation, a
/// peer read only conflicts with a prior write reservation (write-write and
/// read-write are real races; read-read between transactions is not).
#[must_use]
pub fn check_snoop(line_state: u8, snoop_is_write: bool, tsx_active: bool) -> Option<Conflict> {
    if !tsx_active {
        return None;
    }
    let conflicts = if snoop_is_write {
        is_tracked(line_state)
    } else {
        line_state & TM_WRITE != 0
    };
    conflicts.then_some(Conflict::Snoop)
}
