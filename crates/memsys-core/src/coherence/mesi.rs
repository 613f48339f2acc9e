//! Illinois MESI transition tables (spec §4.6.1).
//!
//! Every function here operates on the bare three-bit state — callers strip
//! the TSX overlay before calling in and re-apply it after, see
//! [`super::tsx`].

use super::{Outcome, E, I, M, S};
use crate::request::OpType;

/// A hit serviced from this controller's own core/CPU side.
#[must_use]
pub fn handle_local_hit(state: u8, op: OpType, is_lowest_private: bool) -> (u8, Outcome) {
    match (state, op) {
        (_, OpType::Update) => (state, Outcome::ForwardDown),
        (_, OpType::Tsx(_)) => (state, Outcome::RespondNoData),

        (I, _) => (I, Outcome::TreatAsMiss),

        (E, OpType::Read) => (E, Outcome::Respond { shared: false }),
        (E, OpType::Write) => promote_to_modified(is_lowest_private),
        (E, OpType::Evict) => (I, Outcome::NoOp),

        (S, OpType::Read) => (S, Outcome::Respond { shared: true }),
        (S, OpType::Write) => promote_to_modified(is_lowest_private),
        (S, OpType::Evict) => (I, Outcome::NoOp),

        (M, OpType::Read | OpType::Write) => (M, Outcome::Respond { shared: false }),
        (M, OpType::Evict) => (I, Outcome::NoOp),

        (_, _) => (state, Outcome::NoOp),
    }
}

fn promote_to_modified(is_lowest_private: bool) -> (u8, Outcome) {
    if is_lowest_private {
        (M, Outcome::Respond { shared: false })
    } else {
        (I, Outcome::TreatAsMiss)
    }
}

/// A hit processed against a message arriving from the interconnect: a
/// snoop from a peer, or a request/response forwarded from a lower level.
#[must_use]
pub fn handle_interconn_hit(state: u8, op: OpType, _is_lowest_private: bool) -> (u8, Outcome) {
    match (state, op) {
        (_, OpType::Evict) => (state, Outcome::NoOp),
        (_, OpType::Update) => (state, Outcome::ForwardDown),
        (_, OpType::Tsx(_)) => (state, Outcome::RespondNoData),

        (E, OpType::Read) => (S, Outcome::Respond { shared: true }),
        (S, OpType::Read) => (S, Outcome::Respond { shared: true }),
        (M, OpType::Read) => (S, Outcome::Respond { shared: true }),

        (E, OpType::Write) => (I, Outcome::RespondNoData),
        (S, OpType::Write) => (I, Outcome::RespondNoData),
        (M, OpType::Write) => (I, Outcome::Respond { shared: false }),

        (I, _) => (I, Outcome::RespondNoData),
        (_, _) => (state, Outcome::RespondNoData),
    }
}

/// The state a line adopts once a fill response completes a miss.
#[must_use]
pub fn complete_request(op: OpType, response_is_shared: bool, is_lowest_private: bool) -> u8 {
    match op {
        OpType::Write if is_lowest_private => M,
        OpType::Write => I,
        OpType::Read if response_is_shared => S,
        OpType::Read => E,
        OpType::Update | OpType::Evict | OpType::Tsx(_) => I,
    }
}
