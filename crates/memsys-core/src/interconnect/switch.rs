//! NxN switch interconnect: per-port inbound queues and busy flags
//! (spec §4.9).

use std::collections::VecDeque;

use crate::common::ControllerId;
use crate::request::RequestHandle;

#[derive(Debug)]
struct QueueEntry {
    request: RequestHandle,
    destination: usize,
    has_data: bool,
    annuled: bool,
}

/// Parameters for a [`Switch`].
#[derive(Clone, Copy, Debug)]
pub struct SwitchParams {
    /// Cycles from `send_complete` firing to the message reaching the
    /// destination.
    pub latency: u64,
    /// Cycles to wait before retrying a blocked or refused send.
    pub retry_latency: u64,
}

/// Result of [`Switch::controller_request`].
#[derive(Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Queued; the caller must schedule a `send` event at `+1` since no send
    /// was already in progress for this port.
    ScheduleSend,
    /// Queued behind an already in-progress send.
    Queued,
}

/// Result of [`Switch::send`].
#[derive(Debug)]
pub enum SendOutcome {
    /// Nothing queued on this port.
    Idle,
    /// The destination is busy, or the head entry was annulled and skipped
    /// leaving nothing sendable; retry `send` after `retry_latency`.
    Retry,
    /// The destination was claimed; schedule `send_complete` after
    /// `latency` cycles.
    Sending { destination: usize },
}

/// Result of [`Switch::send_complete`].
#[derive(Debug)]
pub enum CompleteOutcome {
    /// The destination accepted the message: its head entry is popped and
    /// the destination is freed.
    Accepted {
        request: RequestHandle,
        destination: usize,
        has_data: bool,
    },
    /// The destination refused (its own inbound queue was full): the entry
    /// stays queued, the destination is freed, and `send` should be
    /// retried for this port.
    Refused,
}

/// An NxN crossbar with one inbound queue and one `recv_busy` flag per
/// attached controller.
#[derive(Debug)]
pub struct Switch {
    controllers: Vec<ControllerId>,
    queues: Vec<VecDeque<QueueEntry>>,
    recv_busy: Vec<bool>,
    sending: Vec<bool>,
    latency: u64,
    retry_latency: u64,
}

impl Switch {
    /// Creates a switch with no ports attached.
    #[must_use]
    pub fn new(params: SwitchParams) -> Self {
        Self {
            controllers: Vec::new(),
            queues: Vec::new(),
            recv_busy: Vec::new(),
            sending: Vec::new(),
            latency: params.latency,
            retry_latency: params.retry_latency,
        }
    }

    /// Attaches a new port, returning its index.
    pub fn register(&mut self, controller: ControllerId) -> usize {
        self.controllers.push(controller);
        self.queues.push(VecDeque::new());
        self.recv_busy.push(false);
        self.sending.push(false);
        self.controllers.len() - 1
    }

    /// Cycles from a claimed destination to message delivery.
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Cycles to wait before retrying a blocked or refused send.
    #[must_use]
    pub fn retry_latency(&self) -> u64 {
        self.retry_latency
    }

    /// Enqueues a message from `sender` to `destination`.
    pub fn controller_request(
        &mut self,
        sender: usize,
        destination: usize,
        request: RequestHandle,
        has_data: bool,
    ) -> RequestOutcome {
        self.queues[sender].push_back(QueueEntry {
            request,
            destination,
            has_data,
            annuled: false,
        });
        if self.sending[sender] {
            RequestOutcome::Queued
        } else {
            self.sending[sender] = true;
            RequestOutcome::ScheduleSend
        }
    }

    /// Attempts to send the head of `sender`'s queue.
    pub fn send(&mut self, sender: usize) -> SendOutcome {
        while matches!(self.queues[sender].front(), Some(e) if e.annuled) {
            let _ = self.queues[sender].pop_front();
        }
        let Some(entry) = self.queues[sender].front() else {
            self.sending[sender] = false;
            return SendOutcome::Idle;
        };

        let destination = entry.destination;
        if self.recv_busy[destination] {
            return SendOutcome::Retry;
        }
        self.recv_busy[destination] = true;
        SendOutcome::Sending { destination }
    }

    /// Completes the in-flight send on `sender`'s port. `accepted` reflects
    /// whether the destination's own inbound queue had room.
    pub fn send_complete(&mut self, sender: usize, accepted: bool) -> CompleteOutcome {
        let entry = self.queues[sender].front().expect("send_complete with nothing in flight");
        let destination = entry.destination;
        self.recv_busy[destination] = false;

        if accepted {
            let entry = self.queues[sender].pop_front().expect("checked above");
            CompleteOutcome::Accepted {
                request: entry.request,
                destination,
                has_data: entry.has_data,
            }
        } else {
            CompleteOutcome::Refused
        }
    }

    /// Marks every queued entry for `request`, across every port, annulled.
    /// The entries are skipped by `send` rather than removed eagerly, since
    /// a send may already be in flight against one of them.
    pub fn annul(&mut self, request: RequestHandle) {
        for queue in &mut self.queues {
            for entry in queue.iter_mut() {
                if entry.request == request {
                    entry.annuled = true;
                }
            }
        }
    }

    /// Whether `port`'s inbound queue has room for one more entry, given
    /// `capacity`. The switch itself does not own a capacity bound per
    /// spec's Non-goals on bit-level fidelity; the caller (the owning cache
    /// controller) supplies it.
    #[must_use]
    pub fn queue_len(&self, port: usize) -> usize {
        self.queues[port].len()
    }
}
