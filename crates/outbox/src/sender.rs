// SPDX-License-Identifier: Apache-2.0

//! The `Sender` contract (C6, §4.6).
//!
//! Implementations that marshal events onto a concrete gateway transport are
//! external to this crate (§1 scope); only the abstract contract and a
//! recording test double live here.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::Event;

/// Outcome of one `Sender::send` call (§3 "SendResult").
///
/// The gateway accepts a **contiguous prefix**: `last_seq` is the largest
/// sequence forming a gap-free prefix it now durably holds, `expected_seq`
/// is what it expects next, and `rejected_seq` names entries that must be
/// resubmitted and must never be treated as acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendResult {
    /// Largest sequence in the accepted gap-free prefix, or `0` if none.
    pub last_seq: u64,
    /// Next sequence the gateway expects.
    pub expected_seq: u64,
    /// Sequences the gateway rejected; disjoint from the accepted prefix.
    pub rejected_seq: Vec<u64>,
}

/// Abstract batch sender to a remote gateway.
///
/// Object-safe so an [`crate::supervisor::Outbox`] can own one as a trait
/// object. Preconditions (§4.6): `events` is non-empty and sorted ascending
/// by `seq` with no internal gaps; an empty input must yield a zero result
/// with no side effects — callers never invoke `send` with an empty slice,
/// but implementations should treat it as a no-op defensively.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sends `events` to the gateway and reports what it durably accepted.
    /// `ctx` carries the supervisor's shutdown cancellation (§5); long-lived
    /// implementations should race their transport I/O against it.
    async fn send(&self, ctx: &CancellationToken, events: &[Event]) -> SendResult;
}

/// Records every batch it is given and returns a caller-supplied result for
/// each call, in order. Used by this crate's own integration tests; not a
/// production transport (§1 scope keeps the real gateway RPC external).
#[cfg(any(test, feature = "test-util"))]
pub struct RecordingSender {
    responses: parking_lot::Mutex<std::collections::VecDeque<SendResult>>,
    /// Every batch passed to `send`, in call order, for test assertions.
    pub received: parking_lot::Mutex<Vec<Vec<Event>>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingSender {
    /// Builds a sender that returns `responses[i]` on its `i`-th call, and
    /// a zero [`SendResult`] once exhausted.
    #[must_use]
    pub fn new(responses: Vec<SendResult>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into()),
            received: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor: always accepts the batch's last sequence.
    #[must_use]
    pub fn accept_all() -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            received: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, _ctx: &CancellationToken, events: &[Event]) -> SendResult {
        self.received.lock().push(events.to_vec());
        if let Some(result) = self.responses.lock().pop_front() {
            return result;
        }
        match events.last() {
            Some(last) => SendResult {
                last_seq: last.seq,
                expected_seq: last.seq + 1,
                rejected_seq: Vec::new(),
            },
            None => SendResult::default(),
        }
    }
}
