// SPDX-License-Identifier: Apache-2.0

//! Pluggable wait strategies for [`crate::RingBuffer`] (§4.7, §9).

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A strategy for spinning or parking while a gating condition is false.
///
/// Must be safe to invoke from tight loops on both the producer and every
/// consumer thread.
pub trait WaitStrategy: Send + Sync {
    /// Blocks (or spins) briefly, then returns so the caller can re-check
    /// its gating condition.
    fn wait(&self);
}

/// Cooperative-yield strategy: lowest latency, burns a full core while
/// waiting. Appropriate when producer and consumers are expected to be
/// within a few nanoseconds of each other.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy;

impl WaitStrategy for YieldingWaitStrategy {
    fn wait(&self) {
        std::thread::yield_now();
    }
}

/// Park-based strategy for low-CPU waits. Re-checks its gating condition on
/// a bounded timeout rather than on an explicit wakeup signal, trading a
/// small amount of latency for a much simpler (and still correct) condvar
/// protocol: the producer and consumers never need to know who else might be
/// waiting, or to remember to notify them.
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    park_timeout: Duration,
}

impl BlockingWaitStrategy {
    /// Creates a strategy that parks for up to `park_timeout` per wait call.
    #[must_use]
    pub fn new(park_timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            park_timeout,
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new(Duration::from_micros(50))
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait(&self) {
        let mut guard = self.mutex.lock();
        self.condvar.wait_for(&mut guard, self.park_timeout);
    }
}
