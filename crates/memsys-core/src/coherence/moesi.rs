//! MOESI: MESI plus an Owner state that lets a dirty line be shared
//! read-only without writing back to memory first (spec §4.6.2).
//!
//! The owner/sharer bookkeeping itself lives in [`super::directory`]; this
//! module only supplies the local per-line state transitions. A controller
//! consults the directory separately when a lowest-private write hit needs
//! to invalidate other sharers before claiming `M`.

use super::{mesi, Outcome, E, I, M, O, S};
use crate::request::OpType;

/// A hit serviced from this controller's own core/CPU side.
#[must_use]
pub fn handle_local_hit(state: u8, op: OpType, is_lowest_private: bool) -> (u8, Outcome) {
    match (state, op) {
        (O, OpType::Read) => (O, Outcome::Respond { shared: true }),
        (O, OpType::Write) => {
            if is_lowest_private {
                // The directory must invalidate any other sharers before
                // this completes; the controller drives that separately.
                (M, Outcome::Respond { shared: false })
            } else {
                (I, Outcome::TreatAsMiss)
            }
        }
        (O, OpType::Evict) => (I, Outcome::NoOp),
        (O, OpType::Update) => (O, Outcome::ForwardDown),
        (O, OpType::Tsx(_)) => (O, Outcome::RespondNoData),
        _ => mesi::handle_local_hit(state, op, is_lowest_private),
    }
}

/// A hit processed against a message arriving from the interconnect.
#[must_use]
pub fn handle_interconn_hit(state: u8, op: OpType, is_lowest_private: bool) -> (u8, Outcome) {
    match (state, op) {
        // A snoop read of an Owner line keeps this cache as the owner and
        // just hands over a copy; no downgrade, unlike MESI's M->S path.
        (O, OpType::Read) => (O, Outcome::Respond { shared: true }),
        // A snoop write to an Owner line still holds the only dirty copy,
        // so it must supply data on the way to Invalid.
        (O, OpType::Write) => (I, Outcome::Respond { shared: false }),
        (O, OpType::Evict) => (O, Outcome::NoOp),
        (O, OpType::Update) => (O, Outcome::ForwardDown),
        (O, OpType::Tsx(_)) => (O, Outcome::RespondNoData),
        // A snoop read of a Modified line demotes the holder to Owner
        // rather than Shared, so the dirty data need not be written back.
        (M, OpType::Read) => (O, Outcome::Respond { shared: true }),
        _ => mesi::handle_interconn_hit(state, op, is_lowest_private),
    }
}

/// The state a line adopts once a fill response completes a miss. MOESI
/// never needs to distinguish this from MESI's rule: a read miss always
/// installs `E`/`S` and a write miss always installs `M`/nothing, since a
/// fresh fill is never itself an `O`-state install.
#[must_use]
pub fn complete_request(op: OpType, response_is_shared: bool, is_lowest_private: bool) -> u8 {
    mesi::complete_request(op, response_is_shared, is_lowest_private)
}
