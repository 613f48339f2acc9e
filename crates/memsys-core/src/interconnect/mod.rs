//! Interconnect fabrics: the three ways a [`crate::controller`] forwards a
//! [`crate::message::Message`] to another controller.
//!
//! Each fabric is data-only, like [`crate::dram::DramController`]: it never
//! touches [`crate::event::EventQueue`] directly. It reports what happened
//! through an outcome enum and the facade in `hierarchy.rs` schedules
//! whatever follow-up event that outcome calls for.

pub mod bus;
pub mod p2p;
pub mod switch;
