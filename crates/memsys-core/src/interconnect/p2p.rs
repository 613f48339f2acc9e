//! Point-to-point interconnect: exactly two controllers, zero advertised
//! latency, no queueing (spec §4.8).

use crate::common::ControllerId;

/// A zero-latency link between exactly two controllers.
#[derive(Default)]
pub struct P2p {
    endpoints: [Option<ControllerId>; 2],
}

impl P2p {
    /// Creates a link with no endpoints registered yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a controller as one of this link's two endpoints.
    /// Returns `false` if both slots are already taken.
    pub fn register(&mut self, controller: ControllerId) -> bool {
        if self.endpoints[0].is_none() {
            self.endpoints[0] = Some(controller);
            true
        } else if self.endpoints[1].is_none() {
            self.endpoints[1] = Some(controller);
            true
        } else {
            false
        }
    }

    /// Given one registered endpoint, returns the other. `None` if `from`
    /// is not a registered endpoint, or the link is not yet fully wired.
    #[must_use]
    pub fn other_endpoint(&self, from: ControllerId) -> Option<ControllerId> {
        match self.endpoints {
            [Some(a), Some(b)] if a == from => Some(b),
            [Some(a), Some(b)] if b == from => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_to_the_other_registered_endpoint() {
        let mut link = P2p::new();
        assert!(link.register(ControllerId(0)));
        assert!(link.register(ControllerId(1)));
        assert_eq!(link.other_endpoint(ControllerId(0)), Some(ControllerId(1)));
        assert_eq!(link.other_endpoint(ControllerId(1)), Some(ControllerId(0)));
    }

    #[test]
    fn a_third_registration_is_rejected() {
        let mut link = P2p::new();
        link.register(ControllerId(0));
        link.register(ControllerId(1));
        assert!(!link.register(ControllerId(2)));
    }

    #[test]
    fn unwired_link_has_no_other_endpoint() {
        let mut link = P2p::new();
        link.register(ControllerId(0));
        assert_eq!(link.other_endpoint(ControllerId(0)), None);
    }
}
