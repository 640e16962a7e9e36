use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a queue's counters.
///
/// Counters are updated with `Relaxed` ordering and read one at a time, so a
/// snapshot taken under concurrent mutation need not be self-consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pushes: u64,
    pub pops: u64,
    pub empty_pops: u64,
    pub cas_retries: u64,
    pub parks: u64,
    pub timeouts: u64,
    pub cancellations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pushes: AtomicU64,
    pops: AtomicU64,
    empty_pops: AtomicU64,
    cas_retries: AtomicU64,
    parks: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
}

impl QueueCounters {
    #[inline]
    pub(crate) fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_pop(&self) {
        self.pops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_empty_pop(&self) {
        self.empty_pops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            pushes: self.pushes.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
            empty_pops: self.empty_pops.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}
