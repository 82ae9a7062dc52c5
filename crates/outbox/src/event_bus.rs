// SPDX-License-Identifier: Apache-2.0

//! Optional in-memory fan-out of published events to observers, backed by
//! `outbox-ring` (C7). Independent of the WAL: an `EventBus` only reflects
//! events published to it explicitly, it is not wired into the send loop
//! automatically.

use outbox_ring::{BlockingWaitStrategy, ConsumerHandle, RingBuffer, WaitStrategy};

use crate::event::Event;

/// A bounded, power-of-two-capacity fan-out bus for [`Event`]s.
///
/// Every [`EventBusConsumer`] observes every published event exactly once,
/// in publish order, independent of the other consumers.
pub struct EventBus {
    ring: RingBuffer<Option<Event>>,
}

impl EventBus {
    /// Builds a bus with `capacity` slots (must be a power of two) using the
    /// given wait strategy.
    #[must_use]
    pub fn new(capacity: usize, wait: Box<dyn WaitStrategy>) -> Self {
        Self {
            ring: RingBuffer::new(capacity, wait),
        }
    }

    /// Builds a bus using [`BlockingWaitStrategy`]'s default timeout.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Box::new(BlockingWaitStrategy::default()))
    }

    /// Publishes `event` to every current and future subscriber.
    pub fn publish(&self, event: Event) {
        self.ring.publish(Some(event));
    }

    /// Registers a new subscriber, starting from the next event published
    /// after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventBusConsumer {
        EventBusConsumer {
            ring: self.ring.clone(),
            consumer: self.ring.register_consumer(),
        }
    }
}

/// A registered subscriber's handle onto an [`EventBus`].
pub struct EventBusConsumer {
    ring: RingBuffer<Option<Event>>,
    consumer: ConsumerHandle<Option<Event>>,
}

impl EventBusConsumer {
    /// Blocks until the next event is published, then returns it.
    ///
    /// Panics only if a slot this consumer is gated to receive was somehow
    /// never published, which cannot happen through [`EventBus::publish`].
    pub fn recv(&self) -> Event {
        let (value, _seq) = self.ring.consume(&self.consumer);
        value.expect("ring slots reachable by a consumer are always published")
    }
}
