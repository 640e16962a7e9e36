use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use msqueue_core::{QueueError, Result, WaitConfig, WaitStrategy};
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::stats::{QueueCounters, QueueStats};
use crate::wait::{WaitOptions, Waiters};

struct Node<T> {
    /// Uninitialised in the sentinel. A popped node becomes the new sentinel
    /// after its value has been moved out, so `Node` never drops `data`.
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        }
    }

    fn new(value: T) -> Self {
        Self {
            data: MaybeUninit::new(value),
            next: Atomic::null(),
        }
    }
}

/// Unbounded lock-free MPMC queue (Michael-Scott).
///
/// - `head` points at a sentinel; the oldest element lives in `head.next`
/// - A push is linearised at the CAS that links the node after the last one;
///   `tail` may lag by one and is swung forward by whoever sees it lagging
/// - Unlinked sentinels are retired through `crossbeam_epoch`, so a node is
///   freed only after every thread that could have loaded it has unpinned
/// - `len()` is advisory
pub struct LinkedQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    len: CachePadded<AtomicIsize>,
    waiters: Waiters,
    counters: QueueCounters,
    wait: WaitConfig,
}

// Safety: values are moved in by one producer and out by exactly one consumer;
// no `&T` is ever shared between threads.
unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T> LinkedQueue<T> {
    /// Create an empty queue holding only the sentinel node.
    pub fn new() -> Self {
        Self::with_wait_config(WaitConfig::default())
    }

    /// Create an empty queue whose blocking pops use `wait` by default.
    pub fn with_wait_config(wait: WaitConfig) -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            len: CachePadded::new(AtomicIsize::new(0)),
            waiters: Waiters::default(),
            counters: QueueCounters::default(),
            wait,
        };

        // Safety: the queue is not shared yet.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }

        queue
    }

    /// Append `value` at the tail. Never blocks and never fails.
    pub fn push(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node::new(value)).into_shared(guard);
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: tail is never null and is protected by the guard.
            let t = unsafe { tail.deref() };
            let next = t.next.load(Ordering::Acquire, guard);

            if !next.is_null() {
                // Another producer linked but has not swung tail yet.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                self.counters.record_retry();
                continue;
            }

            if t
                .next
                .compare_exchange(
                    Shared::null(),
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                )
                .is_ok()
            {
                let _ = self.tail.compare_exchange(
                    tail,
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                break;
            }

            self.counters.record_retry();
            backoff.spin();
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        self.counters.record_push();
        self.waiters.notify_one();
    }

    /// Build the element with `make` and push it.
    pub fn push_with<F>(&self, make: F)
    where
        F: FnOnce() -> T,
    {
        self.push(make())
    }

    /// One attempt at unlinking the first element.
    ///
    /// `Ok(None)` means empty, `Err(())` means another consumer won the race.
    fn pop_internal(&self, guard: &Guard) -> std::result::Result<Option<T>, ()> {
        let head = self.head.load(Ordering::Acquire, guard);
        // Safety: head is never null and is protected by the guard.
        let h = unsafe { head.deref() };
        let next = h.next.load(Ordering::Acquire, guard);

        // Safety: a non-null next is a live node protected by the guard.
        let Some(n) = (unsafe { next.as_ref() }) else {
            return Ok(None);
        };

        self.head
            .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
            .map_err(|_| ())?;

        // Keep tail off the node being retired.
        let tail = self.tail.load(Ordering::Relaxed, guard);
        if head == tail {
            let _ = self.tail.compare_exchange(
                tail,
                next,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            );
        }

        // Safety: winning the head CAS grants exclusive ownership of n's value,
        // and the old sentinel is unreachable for threads pinned from now on.
        unsafe {
            guard.defer_destroy(head);
            Ok(Some(n.data.assume_init_read()))
        }
    }

    /// Remove the oldest element, or return `None` if the queue was empty at
    /// the moment of the attempt. Never blocks.
    pub fn try_pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        let backoff = Backoff::new();

        loop {
            match self.pop_internal(guard) {
                Ok(Some(value)) => {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    self.counters.record_pop();
                    return Some(value);
                }
                Ok(None) => {
                    self.counters.record_empty_pop();
                    return None;
                }
                Err(()) => {
                    self.counters.record_retry();
                    backoff.spin();
                }
            }
        }
    }

    /// Block until an element is available.
    ///
    /// Uses the queue's configured strategy without a deadline.
    pub fn wait_pop(&self) -> T {
        let opts = WaitOptions {
            deadline: None,
            ..WaitOptions::from_config(&self.wait)
        };
        loop {
            // Without a deadline or token the only outcome is a value.
            if let Ok(value) = self.wait_pop_with(&opts) {
                return value;
            }
        }
    }

    pub fn wait_pop_timeout(&self, timeout: Duration) -> Result<T> {
        self.wait_pop_until(Instant::now() + timeout)
    }

    pub fn wait_pop_until(&self, deadline: Instant) -> Result<T> {
        let opts = WaitOptions::from_config(&self.wait).with_deadline(deadline);
        self.wait_pop_with(&opts)
    }

    /// Block according to `opts`.
    ///
    /// An element that is available wins over an expired deadline or a
    /// fired token.
    pub fn wait_pop_with(&self, opts: &WaitOptions) -> Result<T> {
        let backoff = Backoff::new();

        loop {
            if let Some(value) = self.try_pop() {
                return Ok(value);
            }

            if opts.is_cancelled() {
                trace!("wait_pop cancelled");
                self.counters.record_cancellation();
                return Err(QueueError::Cancelled);
            }

            let now = Instant::now();
            if opts.is_expired(now) {
                trace!("wait_pop timed out");
                self.counters.record_timeout();
                return Err(QueueError::Timeout);
            }

            match opts.strategy {
                WaitStrategy::Spin => std::hint::spin_loop(),
                WaitStrategy::Backoff => {
                    if backoff.is_completed() {
                        std::thread::yield_now();
                    } else {
                        backoff.snooze();
                    }
                }
                WaitStrategy::Park => {
                    if backoff.is_completed() {
                        let slice = opts.park_duration(now);
                        trace!(?slice, "wait_pop parking");
                        self.counters.record_park();
                        self.waiters
                            .park(slice, || !self.is_empty() || opts.is_cancelled());
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    /// True iff the sentinel had no successor at the instant of the read.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // Safety: head is never null and is protected by the guard.
        unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .is_null()
    }

    /// Advisory element count.
    ///
    /// A pop can be counted before the push it raced with, so the raw counter
    /// may dip below zero; it is reported as zero.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    /// Pop everything currently reachable and return how many were removed.
    pub fn clear(&self) -> usize {
        self.drain().count()
    }

    /// Iterator of `try_pop` results, ending at the first empty observation.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain { queue: self }
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }
}

impl<T> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no other thread can reach the nodes.
        unsafe {
            let guard = epoch::unprotected();
            let mut remaining = 0usize;
            while let Ok(Some(value)) = self.pop_internal(guard) {
                drop(value);
                remaining += 1;
            }
            if remaining > 0 {
                debug!(remaining, "dropping non-empty queue");
            }

            let sentinel = self.head.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

impl<T> fmt::Debug for LinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedQueue")
            .field("len", &self.len())
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl<T> Extend<T> for LinkedQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T> FromIterator<T> for LinkedQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = Self::new();
        for value in iter {
            queue.push(value);
        }
        queue
    }
}

/// Draining iterator returned by [`LinkedQueue::drain`].
pub struct Drain<'a, T> {
    queue: &'a LinkedQueue<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.try_pop()
    }
}
