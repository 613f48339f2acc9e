//! `Message`: a short-lived token carrying a request between controllers
//! over an interconnect.
//!
//! Messages are borrowed from a [`MessagePool`] for the span of a single
//! `emit` and released immediately after every receiver's signal callback
//! returns (spec §3). Unlike [`crate::request::RequestPool`] entries they
//! are never held across an event boundary, so they need no refcount —
//! just alloc-for-the-call / free-at-the-end.

use crate::common::{ControllerId, Slab, SlabIndex};
use crate::request::RequestHandle;

/// A handle to a [`Message`] borrowed from a [`MessagePool`].
pub type MessageHandle = SlabIndex;

/// Protocol-opaque payload a coherence logic implementation attaches to a
/// message — e.g. the MESI/MOESI state a fill response should install, or
/// an MOESI directory invalidation target list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolArg {
    /// No protocol-specific payload.
    None,
    /// An encoded coherence line state the receiver should adopt.
    LineState(u8),
}

/// A message flowing from one controller to another (or to/from an
/// interconnect's own bookkeeping).
#[derive(Clone, Debug)]
pub struct Message {
    /// Controller that emitted this message.
    pub sender: ControllerId,
    /// The request this message concerns.
    pub request: RequestHandle,
    /// Destination controller, if this message targets one directly.
    pub destination: Option<ControllerId>,
    /// Origin controller the request ultimately came from, if relevant to
    /// the receiver's coherence bookkeeping (e.g. directory invalidations).
    pub origin: Option<ControllerId>,
    /// Whether this message carries the line's data (a fill response),
    /// as opposed to being a bare coherence notification.
    pub has_data: bool,
    /// Whether the responder holds the line non-exclusively.
    pub is_shared: bool,
    /// Protocol-opaque argument (e.g. the state to install).
    pub arg: ProtocolArg,
}

/// Pool of transiently-borrowed [`Message`]s.
#[derive(Default)]
pub struct MessagePool {
    slab: Slab<Message>,
}

impl MessagePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self { slab: Slab::new() }
    }

    /// Borrows a message for the duration of one emit.
    pub fn borrow(&mut self, message: Message) -> MessageHandle {
        self.slab.insert(message)
    }

    /// Reads the fields of a borrowed message.
    #[must_use]
    pub fn get(&self, handle: MessageHandle) -> Option<&Message> {
        self.slab.get(handle)
    }

    /// Releases a message immediately after all receivers have returned
    /// from their signal callbacks.
    pub fn release(&mut self, handle: MessageHandle) {
        let freed = self.slab.remove(handle);
        debug_assert!(freed.is_some(), "release() on an already-freed message");
    }

    /// Number of messages currently on loan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// True if no messages are on loan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}
