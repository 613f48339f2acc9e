//! Machine-description build errors.
//!
//! Per the error-handling design (spec §7), no error ever flows through the
//! request path: a request completes, is annulled, or its handling
//! controller has a bug. The only fallible surface is turning a
//! [`crate::config::MachineConfig`] into a running [`crate::hierarchy::MemoryHierarchy`].

use thiserror::Error;

/// Errors detected while building a [`crate::hierarchy::MemoryHierarchy`]
/// from a [`crate::config::MachineConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A controller or interconnect name was reused.
    #[error("duplicate component name: {0}")]
    DuplicateName(String),

    /// A controller config named a `kind` the builder does not recognize.
    #[error("unknown controller kind: {0}")]
    UnknownControllerKind(String),

    /// An interconnect config named a `kind` the builder does not recognize.
    #[error("unknown interconnect kind: {0}")]
    UnknownInterconnectKind(String),

    /// A connection referenced a controller or interconnect name that was
    /// never declared.
    #[error("connection refers to unknown component: {0}")]
    UnknownComponent(String),

    /// A declared controller has no connection entry attaching it to
    /// anything, so it can never send or receive traffic.
    #[error("controller {0} is not connected to any interconnect")]
    UnconnectedController(String),

    /// The lower/upper links between controllers and interconnects form a
    /// cycle, which would deadlock request forwarding.
    #[error("connection graph has a cycle: {0:?}")]
    ConnectionCycle(Vec<String>),

    /// A cache controller config is missing the cache-specific parameters
    /// block (`CacheParams`) its `kind` requires.
    #[error("controller {0} of kind {1} requires cache parameters")]
    MissingCacheParams(String, &'static str),

    /// A DRAM controller config is missing `DramParams`.
    #[error("controller {0} requires dram parameters")]
    MissingDramParams(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let err = BuildError::UnknownControllerKind("frobnicator".into());
        assert_eq!(err.to_string(), "unknown controller kind: frobnicator");
    }
}
