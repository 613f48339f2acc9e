//! Controllers: the two kinds of component that originate and service
//! [`crate::request::MemoryRequest`]s (spec §4.4, §4.5).
//!
//! [`cpu`] is the front end a core issues accesses through; [`cache`] is a
//! coherent level that sits between a CPU controller (or another cache
//! controller) and whatever is below it — another cache controller, or the
//! DRAM controller directly. Both are data-only like every other component
//! in this crate: they report what happened and leave scheduling to
//! [`crate::hierarchy::MemoryHierarchy`].

pub mod cache;
pub mod cpu;
