use crossbeam_utils::CachePadded;
use msqueue_core::{QueueError, Result, WaitConfig};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::linked::LinkedQueue;
use crate::stats::QueueStats;
use crate::wait::WaitOptions;

/// Returned by [`BoundedQueue::try_push`]; hands the rejected value back.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    #[error("queue is full")]
    Full(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(value) => value,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

/// `LinkedQueue` with a hard capacity.
///
/// Producers reserve a slot with a CAS on `reserved` before linking, so the
/// number of elements never exceeds `capacity`. Unlike `LinkedQueue::len`,
/// the reservation count is exact.
pub struct BoundedQueue<T> {
    inner: LinkedQueue<T>,
    capacity: usize,
    reserved: CachePadded<AtomicUsize>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_wait_config(capacity, WaitConfig::default())
    }

    pub fn with_wait_config(capacity: usize, wait: WaitConfig) -> Result<Self> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            inner: LinkedQueue::with_wait_config(wait),
            capacity,
            reserved: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    pub fn try_push(&self, value: T) -> std::result::Result<(), PushError<T>> {
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            if current >= self.capacity {
                return Err(PushError::Full(value));
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.inner.push(value);
        Ok(())
    }

    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.inner.try_pop().map(|v| self.release(v))
    }

    pub fn wait_pop(&self) -> T {
        let value = self.inner.wait_pop();
        self.release(value)
    }

    pub fn wait_pop_timeout(&self, timeout: Duration) -> Result<T> {
        self.inner.wait_pop_timeout(timeout).map(|v| self.release(v))
    }

    pub fn wait_pop_until(&self, deadline: Instant) -> Result<T> {
        self.inner.wait_pop_until(deadline).map(|v| self.release(v))
    }

    pub fn wait_pop_with(&self, opts: &WaitOptions) -> Result<T> {
        self.inner.wait_pop_with(opts).map(|v| self.release(v))
    }

    #[inline]
    fn release(&self, value: T) -> T {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        value
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot; a slot may be released or reserved right after.
    pub fn is_full(&self) -> bool {
        self.reserved.load(Ordering::Acquire) >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats()
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved.load(Ordering::Relaxed))
            .field("wait_strategy", &self.inner.wait_config().strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            BoundedQueue::<u8>::new(0),
            Err(QueueError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn full_queue_returns_value() {
        let q = BoundedQueue::new(2).unwrap();
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert!(q.is_full());

        let err = q.try_push(3).unwrap_err();
        assert_eq!(err.to_string(), "queue is full");
        assert_eq!(err.into_inner(), 3);

        assert_eq!(q.try_pop(), Some(1));
        assert!(!q.is_full());
        q.try_push(3).unwrap();
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn wait_pop_until_releases_slot_or_times_out() {
        let q = BoundedQueue::new(1).unwrap();
        assert!(matches!(
            q.wait_pop_until(Instant::now() + Duration::from_millis(10)),
            Err(QueueError::Timeout)
        ));

        q.try_push(5).unwrap();
        assert!(q.is_full());
        assert_eq!(q.wait_pop_until(Instant::now()).unwrap(), 5);
        assert!(!q.is_full());
        q.try_push(6).unwrap();
    }

    #[test]
    fn debug_shows_capacity_and_wait_strategy() {
        let wait = WaitConfig {
            strategy: msqueue_core::WaitStrategy::Backoff,
            ..WaitConfig::default()
        };
        let q = BoundedQueue::<u8>::with_wait_config(3, wait).unwrap();
        let s = format!("{:?}", q);
        assert!(s.contains("capacity: 3"));
        assert!(s.contains("wait_strategy: Backoff"));
    }

    #[test]
    fn capacity_holds_under_contention() {
        const CAP: usize = 16;
        let q = Arc::new(BoundedQueue::new(CAP).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                thread::spawn(move || {
                    let mut accepted = 0usize;
                    for i in 0..100 {
                        if q.try_push(t * 100 + i).is_ok() {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, CAP);
        assert_eq!(q.len(), CAP);
    }

    #[test]
    fn producers_make_progress_with_a_consumer() {
        let q = Arc::new(BoundedQueue::new(4).unwrap());
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..1_000u32 {
                    let mut value = i;
                    loop {
                        match q.try_push(value) {
                            Ok(()) => break,
                            Err(e) => {
                                value = e.into_inner();
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        };

        let mut expected = 0u32;
        while expected < 1_000 {
            let v = q.wait_pop_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(v, expected);
            expected += 1;
        }
        producer.join().unwrap();
        assert!(q.is_empty());
    }
}
