use msqueue_core::{WaitConfig, WaitStrategy};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Parameters for a blocking pop.
///
/// - `strategy`: how to wait between attempts
/// - `deadline`: give up with `QueueError::Timeout` after this instant
/// - `cancel`: give up with `QueueError::Cancelled` once the token fires
/// - `park_slice`: longest single park before re-checking the queue
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub strategy: WaitStrategy,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
    pub park_slice: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_config(&WaitConfig::default())
    }
}

impl WaitOptions {
    /// Options derived from configuration. `default_timeout_ms` becomes a
    /// deadline relative to now.
    pub fn from_config(config: &WaitConfig) -> Self {
        Self {
            strategy: config.strategy,
            deadline: config.default_timeout().map(|t| Instant::now() + t),
            cancel: None,
            park_slice: config.park_slice(),
        }
    }

    pub fn with_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_park_slice(mut self, slice: Duration) -> Self {
        self.park_slice = slice;
        self
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Park duration for the next round, never past the deadline.
    pub(crate) fn park_duration(&self, now: Instant) -> Duration {
        match self.deadline {
            Some(d) => self.park_slice.min(d.saturating_duration_since(now)),
            None => self.park_slice,
        }
    }
}

/// Sleep/wake channel for consumers that exhausted their backoff.
///
/// Producers only take the lock when `sleeping` is non-zero. Both sides issue
/// a `SeqCst` fence between publishing their own state and reading the other
/// side's, so a push linked before the waiter's check is always seen.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    sleeping: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Waiters {
    /// Called by producers after an element has been linked.
    #[inline]
    pub(crate) fn notify_one(&self) {
        atomic::fence(Ordering::SeqCst);
        if self.sleeping.load(Ordering::Relaxed) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_one();
        }
    }

    /// Block for at most `slice` unless `ready` already holds.
    pub(crate) fn park<F>(&self, slice: Duration, ready: F)
    where
        F: Fn() -> bool,
    {
        self.sleeping.fetch_add(1, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);

        let mut guard = self.lock.lock();
        if !ready() {
            self.cond.wait_for(&mut guard, slice);
        }
        drop(guard);

        self.sleeping.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn park_duration_is_capped_by_deadline() {
        let now = Instant::now();
        let opts = WaitOptions::default()
            .with_park_slice(Duration::from_secs(1))
            .with_deadline(now + Duration::from_millis(5));
        assert!(opts.park_duration(now) <= Duration::from_millis(5));
        assert_eq!(opts.park_duration(now + Duration::from_secs(2)), Duration::ZERO);
        assert!(opts.is_expired(now + Duration::from_millis(5)));
        assert!(!opts.is_expired(now));
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let opts = WaitOptions::default().with_cancellation(token.clone());
        assert!(!opts.is_cancelled());
        token.cancel();
        assert!(opts.is_cancelled());
    }

    #[test]
    fn from_config_turns_timeout_into_deadline() {
        let config = WaitConfig {
            strategy: WaitStrategy::Backoff,
            park_slice_us: 250,
            default_timeout_ms: Some(10),
        };
        let opts = WaitOptions::from_config(&config);
        assert_eq!(opts.strategy, WaitStrategy::Backoff);
        assert_eq!(opts.park_slice, Duration::from_micros(250));
        assert!(opts.deadline.is_some());
    }

    #[test]
    fn park_returns_immediately_when_ready() {
        let waiters = Waiters::default();
        let start = Instant::now();
        waiters.park(Duration::from_secs(5), || true);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn notify_wakes_parked_thread() {
        let waiters = Arc::new(Waiters::default());
        let w = waiters.clone();
        let start = Instant::now();
        let sleeper = thread::spawn(move || w.park(Duration::from_secs(10), || false));

        // the sleeper may register before it holds the lock; keep signalling
        while !sleeper.is_finished() {
            waiters.notify_one();
            thread::sleep(Duration::from_millis(1));
        }
        sleeper.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
