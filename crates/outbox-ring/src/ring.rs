// SPDX-License-Identifier: Apache-2.0

//! Single-producer, multi-consumer ring buffer (C7, §4.7, §9).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

use crate::wait::WaitStrategy;

struct Slot<T>(UnsafeCell<T>);

// SAFETY: access to a slot's value is synchronized entirely through the
// producer's `published` release-store and the consumers' acquire-loads
// against it (see `publish`/`consume`). A slot is never read until
// `published >= seq`, and never overwritten until every registered
// consumer has advanced past it.
unsafe impl<T: Send> Sync for Slot<T> {}

struct Inner<T> {
    buf: Box<[Slot<T>]>,
    mask: i64,
    capacity: i64,
    // Cache-line padded so the producer's claim counter and the published
    // watermark don't false-share a line with each other or with whatever
    // precedes/follows this struct in memory.
    cursor: CachePadded<AtomicI64>,
    published: CachePadded<AtomicI64>,
    consumers: RwLock<Vec<Arc<AtomicI64>>>,
    wait: Box<dyn WaitStrategy>,
}

/// A bounded, power-of-two-capacity SPMC ring. Every registered consumer
/// observes every published value exactly once, in order (fan-out, not
/// work-stealing).
///
/// Cheaply `Clone`able; clones share the same underlying buffer, matching
/// how a producer handle and the registration API are typically passed
/// around independently of the ring's owner.
pub struct RingBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A registered consumer's cursor into the ring. Deregisters itself (so the
/// producer stops gating on it) when dropped.
pub struct ConsumerHandle<T> {
    ring: RingBuffer<T>,
    sequence: Arc<AtomicI64>,
}

impl<T> Drop for ConsumerHandle<T> {
    fn drop(&mut self) {
        let mut consumers = self.ring.inner.consumers.write();
        consumers.retain(|c| !Arc::ptr_eq(c, &self.sequence));
    }
}

impl<T: Default> RingBuffer<T> {
    /// Creates a ring of `capacity` slots (must be a power of two) using
    /// `wait` to back off when gated. Panics if `capacity` is not a power of
    /// two (§9: programmer errors in the ring buffer are construction-time
    /// panics, not runtime errors).
    #[must_use]
    pub fn new(capacity: usize, wait: Box<dyn WaitStrategy>) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "ring buffer capacity must be a power of two, got {capacity}"
        );
        let buf = (0..capacity)
            .map(|_| Slot(UnsafeCell::new(T::default())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            inner: Arc::new(Inner {
                buf,
                mask: capacity as i64 - 1,
                capacity: capacity as i64,
                cursor: CachePadded::new(AtomicI64::new(-1)),
                published: CachePadded::new(AtomicI64::new(-1)),
                consumers: RwLock::new(Vec::new()),
                wait,
            }),
        }
    }
}

impl<T> RingBuffer<T> {
    /// Registers a new consumer, starting at sequence `-1` (before the first
    /// slot). The returned handle gates producer overwrites until dropped.
    #[must_use]
    pub fn register_consumer(&self) -> ConsumerHandle<T> {
        let sequence = Arc::new(AtomicI64::new(-1));
        self.inner.consumers.write().push(sequence.clone());
        ConsumerHandle {
            ring: self.clone(),
            sequence,
        }
    }

    /// Capacity of the ring, in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity as usize
    }

    /// Minimum sequence across all registered consumers. With no consumers
    /// registered, returns the producer's `published` sequence, so the
    /// producer never waits (degenerate fan-out of zero).
    fn min_consumer_seq(&self) -> i64 {
        let consumers = self.inner.consumers.read();
        consumers
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .min()
            .unwrap_or_else(|| self.inner.published.load(Ordering::Acquire))
    }

    fn slot_index(&self, seq: i64) -> usize {
        (seq & self.inner.mask) as usize
    }

    /// Claims the next slot, blocks (via the wait strategy) until it is safe
    /// to overwrite, writes `value` into it, and release-publishes the new
    /// high-watermark. Returns the claimed sequence.
    pub fn publish(&self, value: T) -> i64 {
        self.publish_with(move |slot| *slot = value)
    }

    /// As [`Self::publish`], but hands the claimed slot to `fill` for
    /// in-place construction instead of moving a fully-built value in.
    pub fn publish_with(&self, fill: impl FnOnce(&mut T)) -> i64 {
        let next = self.inner.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        let wrap = next - self.inner.capacity;
        while wrap > self.min_consumer_seq() {
            self.inner.wait.wait();
        }
        let index = self.slot_index(next);
        // SAFETY: `wrap <= min_consumer_seq()` above proves every consumer
        // has already moved past this slot's previous occupant, so no
        // consumer can be reading it concurrently with this write.
        unsafe {
            fill(&mut *self.inner.buf[index].0.get());
        }
        self.inner.published.store(next, Ordering::Release);
        next
    }

    /// Non-blocking variant of [`Self::publish`]. Uses a CAS loop on the
    /// producer cursor (not an unconditional fetch-add) so a claim that
    /// would violate gating can be refused instead of committed and then
    /// unable to be rolled back (§9).
    pub fn try_publish(&self, value: T) -> Result<i64, T> {
        let mut value = Some(value);
        loop {
            let current = self.inner.cursor.load(Ordering::Acquire);
            let next = current + 1;
            let wrap = next - self.inner.capacity;
            if wrap > self.min_consumer_seq() {
                return Err(value.take().expect("value retained on gated return"));
            }
            if self
                .inner
                .cursor
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let index = self.slot_index(next);
                let v = value.take().expect("value retained across CAS loop");
                // SAFETY: see `publish_with`; the gating check above was
                // re-validated against this successful CAS's `next`.
                unsafe {
                    *self.inner.buf[index].0.get() = v;
                }
                self.inner.published.store(next, Ordering::Release);
                return Ok(next);
            }
        }
    }

    /// Blocks (via the wait strategy) until `consumer`'s next sequence has
    /// been published, reads it, advances the consumer's cursor, and
    /// returns `(value, sequence)`.
    pub fn consume(&self, consumer: &ConsumerHandle<T>) -> (T, i64)
    where
        T: Clone,
    {
        let next = consumer.sequence.load(Ordering::Relaxed) + 1;
        while self.inner.published.load(Ordering::Acquire) < next {
            self.inner.wait.wait();
        }
        let index = self.slot_index(next);
        // SAFETY: the acquire-load above observed `published >= next`, which
        // happens-after the producer's release-store in `publish_with`.
        let value = unsafe { (*self.inner.buf[index].0.get()).clone() };
        consumer.sequence.store(next, Ordering::Release);
        (value, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::YieldingWaitStrategy;
    use std::thread;

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_capacity_panics() {
        let _: RingBuffer<i32> = RingBuffer::new(3, Box::new(YieldingWaitStrategy));
    }

    #[test]
    fn degenerate_ring_with_no_consumers_never_blocks() {
        let ring: RingBuffer<i32> = RingBuffer::new(4, Box::new(YieldingWaitStrategy));
        for i in 0..1000 {
            assert_eq!(ring.publish(i), i64::from(i));
        }
    }

    #[test]
    fn single_consumer_observes_values_in_order() {
        let ring: RingBuffer<i32> = RingBuffer::new(8, Box::new(YieldingWaitStrategy));
        let consumer = ring.register_consumer();
        for expected in 0..100 {
            ring.publish(expected);
            let (value, seq) = ring.consume(&consumer);
            assert_eq!(value, expected);
            assert_eq!(seq, i64::from(expected));
        }
    }

    #[test]
    fn fan_out_to_multiple_consumers() {
        let ring: RingBuffer<i32> = RingBuffer::new(8, Box::new(YieldingWaitStrategy));
        let producer = ring.clone();
        let c1 = ring.register_consumer();
        let c2 = ring.register_consumer();

        let writer = thread::spawn(move || {
            for i in 0..1000 {
                producer.publish(i);
            }
        });

        let reader = |ring: RingBuffer<i32>, consumer: ConsumerHandle<i32>| {
            let mut seen = Vec::with_capacity(1000);
            while seen.len() < 1000 {
                let (v, _) = ring.consume(&consumer);
                seen.push(v);
            }
            seen
        };

        let ring2 = ring.clone();
        let r1 = thread::spawn(move || reader(ring2, c1));
        let ring3 = ring.clone();
        let r2 = thread::spawn(move || reader(ring3, c2));

        writer.join().unwrap();
        let seen1 = r1.join().unwrap();
        let seen2 = r2.join().unwrap();

        let expected: Vec<i32> = (0..1000).collect();
        assert_eq!(seen1, expected);
        assert_eq!(seen2, expected);
    }

    #[test]
    fn dropping_a_consumer_stops_gating_on_it() {
        let ring: RingBuffer<i32> = RingBuffer::new(4, Box::new(YieldingWaitStrategy));
        let consumer = ring.register_consumer();
        drop(consumer);
        // With the only consumer dropped, the producer must not block even
        // though nothing has "consumed" past the ring's capacity.
        for i in 0..100 {
            ring.publish(i);
        }
    }

    #[test]
    fn try_publish_refuses_when_gated() {
        let ring: RingBuffer<i32> = RingBuffer::new(2, Box::new(YieldingWaitStrategy));
        let consumer = ring.register_consumer();
        assert!(ring.try_publish(1).is_ok());
        assert!(ring.try_publish(2).is_ok());
        // Capacity 2, consumer hasn't advanced: slot 0 can't be reused yet.
        assert_eq!(ring.try_publish(3), Err(3));
        let (_, _) = ring.consume(&consumer);
        assert!(ring.try_publish(4).is_ok());
    }
}
