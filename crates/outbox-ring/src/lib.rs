// SPDX-License-Identifier: Apache-2.0

//! Single-producer, multi-consumer ring buffer used to fan published
//! outbox events out to in-process observers (metrics, debug taps) without
//! going through the WAL.

pub mod ring;
pub mod wait;

pub use ring::{ConsumerHandle, RingBuffer};
pub use wait::{BlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy};
