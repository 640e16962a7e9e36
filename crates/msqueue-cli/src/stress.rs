use anyhow::{bail, Result};
use clap::ValueEnum;
use msqueue_concurrent::{BoundedQueue, LinkedQueue, QueueError, QueueStats};
use msqueue_core::WaitConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StressMode {
    /// Consumers poll with try_pop
    Try,
    /// Consumers block in wait_pop
    Wait,
}

#[derive(Debug, Clone)]
pub struct StressParams {
    pub producers: usize,
    pub consumers: usize,
    pub items_per_producer: usize,
    pub mode: StressMode,
    pub capacity: Option<usize>,
    pub timeout: Duration,
    pub wait: WaitConfig,
}

/// Largest run the harness will allocate bookkeeping for.
const MAX_TOTAL_ITEMS: usize = 1 << 30;

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub mode: StressMode,
    pub producers: usize,
    pub consumers: usize,
    pub capacity: Option<usize>,
    /// Items the producers were asked to push
    pub requested: usize,
    pub pushed: usize,
    /// Items a bounded producer gave up on when the run deadline passed
    pub unpushed: usize,
    pub popped: usize,
    /// Pushed items the consumers never took, drained after the run
    pub left_in_queue: usize,
    pub missing: usize,
    pub duplicated: usize,
    pub fabricated: usize,
    pub timed_out: bool,
    pub elapsed_ms: u128,
    pub ops_per_sec: f64,
    pub stats: QueueStats,
    pub ok: bool,
}

/// Queue operations the harness drives; lets one run cover both queue kinds.
trait StressTarget: Send + Sync {
    /// Returns false if the value could not be pushed before `deadline`.
    fn push(&self, value: u64, deadline: Instant) -> bool;
    fn try_pop(&self) -> Option<u64>;
    fn wait_pop_timeout(&self, timeout: Duration) -> msqueue_core::Result<u64>;
    fn stats(&self) -> QueueStats;
}

impl StressTarget for LinkedQueue<u64> {
    fn push(&self, value: u64, _deadline: Instant) -> bool {
        LinkedQueue::push(self, value);
        true
    }

    fn try_pop(&self) -> Option<u64> {
        LinkedQueue::try_pop(self)
    }

    fn wait_pop_timeout(&self, timeout: Duration) -> msqueue_core::Result<u64> {
        LinkedQueue::wait_pop_timeout(self, timeout)
    }

    fn stats(&self) -> QueueStats {
        LinkedQueue::stats(self)
    }
}

impl StressTarget for BoundedQueue<u64> {
    fn push(&self, mut value: u64, deadline: Instant) -> bool {
        while let Err(e) = self.try_push(value) {
            if Instant::now() >= deadline {
                return false;
            }
            value = e.into_inner();
            thread::yield_now();
        }
        true
    }

    fn try_pop(&self) -> Option<u64> {
        BoundedQueue::try_pop(self)
    }

    fn wait_pop_timeout(&self, timeout: Duration) -> msqueue_core::Result<u64> {
        BoundedQueue::wait_pop_timeout(self, timeout)
    }

    fn stats(&self) -> QueueStats {
        BoundedQueue::stats(self)
    }
}

/// Run producers pushing disjoint ranges against consumers draining the
/// queue, then check the popped multiset against the pushed one.
///
/// Producer `p` pushes `p * items + 0..items` in order and stops early once
/// the deadline passes, including while retrying on a full bounded queue. Whatever the consumers
/// leave behind is drained before the check.
pub fn run_stress(params: &StressParams) -> Result<StressReport> {
    if params.producers == 0 || params.consumers == 0 {
        bail!("stress needs at least one producer and one consumer");
    }

    let total = match params.producers.checked_mul(params.items_per_producer) {
        Some(total) if total <= MAX_TOTAL_ITEMS => total,
        _ => bail!(
            "stress run of {} producers x {} items exceeds the {} item limit",
            params.producers,
            params.items_per_producer,
            MAX_TOTAL_ITEMS
        ),
    };

    let target: Arc<dyn StressTarget> = match params.capacity {
        Some(capacity) => Arc::new(BoundedQueue::with_wait_config(
            capacity,
            params.wait.clone(),
        )?),
        None => Arc::new(LinkedQueue::with_wait_config(params.wait.clone())),
    };

    info!(
        producers = params.producers,
        consumers = params.consumers,
        total,
        mode = ?params.mode,
        "starting stress run"
    );

    let claimed = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(params.producers + params.consumers));
    let deadline = Instant::now() + params.timeout;
    let begin = Instant::now();
    let per = params.items_per_producer;

    let producers: Vec<_> = (0..params.producers)
        .map(|p| {
            let target = target.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                let base = (p * per) as u64;
                let mut pushed = 0usize;
                for i in 0..per as u64 {
                    if Instant::now() >= deadline || !target.push(base + i, deadline) {
                        debug!(producer = p, pushed, "producer hit the run deadline");
                        break;
                    }
                    pushed += 1;
                }
                pushed
            })
        })
        .collect();

    let consumers: Vec<_> = (0..params.consumers)
        .map(|_| {
            let target = target.clone();
            let claimed = claimed.clone();
            let start = start.clone();
            let mode = params.mode;
            thread::spawn(move || {
                start.wait();
                consume(target.as_ref(), mode, &claimed, total, deadline)
            })
        })
        .collect();

    let mut pushed_per_producer = Vec::with_capacity(params.producers);
    for p in producers {
        match p.join() {
            Ok(pushed) => pushed_per_producer.push(pushed),
            Err(_) => bail!("producer thread panicked"),
        }
    }
    let pushed: usize = pushed_per_producer.iter().sum();

    let mut counts = vec![0u32; total];
    let mut popped = 0usize;
    let mut fabricated = 0usize;
    let mut tally = |v: u64, fabricated: &mut usize| match counts.get_mut(v as usize) {
        Some(slot) => *slot += 1,
        None => *fabricated += 1,
    };
    for c in consumers {
        let values = match c.join() {
            Ok(values) => values,
            Err(_) => bail!("consumer thread panicked"),
        };
        popped += values.len();
        for v in values {
            tally(v, &mut fabricated);
        }
    }

    let mut left_in_queue = 0usize;
    while let Some(v) = target.try_pop() {
        left_in_queue += 1;
        tally(v, &mut fabricated);
    }

    let elapsed = begin.elapsed();
    let mut missing = 0usize;
    let mut duplicated = 0usize;
    for (p, &done) in pushed_per_producer.iter().enumerate() {
        for (i, &c) in counts[p * per..(p + 1) * per].iter().enumerate() {
            if i < done {
                missing += usize::from(c == 0);
                duplicated += usize::from(c > 1);
            } else {
                // never pushed, so any sighting was invented by the queue
                fabricated += c as usize;
            }
        }
    }

    let unpushed = total - pushed;
    let timed_out = unpushed > 0 || left_in_queue > 0;
    let ok = missing == 0 && duplicated == 0 && fabricated == 0;
    if !ok {
        warn!(missing, duplicated, fabricated, "stress run found inconsistencies");
    }
    if timed_out {
        warn!(unpushed, left_in_queue, "stress run stopped at its deadline");
    }

    Ok(StressReport {
        mode: params.mode,
        producers: params.producers,
        consumers: params.consumers,
        capacity: params.capacity,
        requested: total,
        pushed,
        unpushed,
        popped,
        left_in_queue,
        missing,
        duplicated,
        fabricated,
        timed_out,
        elapsed_ms: elapsed.as_millis(),
        ops_per_sec: (pushed + popped) as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats: target.stats(),
        ok,
    })
}

fn consume(
    target: &dyn StressTarget,
    mode: StressMode,
    claimed: &AtomicUsize,
    total: usize,
    deadline: Instant,
) -> Vec<u64> {
    let mut got = Vec::new();
    match mode {
        StressMode::Try => {
            while claimed.load(Ordering::Relaxed) < total {
                if Instant::now() >= deadline {
                    debug!("consumer hit the run deadline");
                    break;
                }
                match target.try_pop() {
                    Some(v) => {
                        got.push(v);
                        claimed.fetch_add(1, Ordering::Relaxed);
                    }
                    None => thread::yield_now(),
                }
            }
        }
        StressMode::Wait => {
            while claimed.fetch_add(1, Ordering::Relaxed) < total {
                if Instant::now() >= deadline {
                    debug!("consumer hit the run deadline");
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                match target.wait_pop_timeout(remaining) {
                    Ok(v) => got.push(v),
                    Err(QueueError::Timeout) => {
                        debug!("consumer hit the run deadline");
                        break;
                    }
                    Err(e) => {
                        warn!("consumer stopped: {}", e);
                        break;
                    }
                }
            }
        }
    }
    got
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: StressMode, capacity: Option<usize>) -> StressParams {
        StressParams {
            producers: 3,
            consumers: 2,
            items_per_producer: 2_000,
            mode,
            capacity,
            timeout: Duration::from_secs(30),
            wait: WaitConfig::default(),
        }
    }

    #[test]
    fn try_mode_is_consistent() {
        let report = run_stress(&params(StressMode::Try, None)).unwrap();
        assert!(report.ok);
        assert!(!report.timed_out);
        assert_eq!(report.popped, 6_000);
        assert_eq!(report.stats.pushes, 6_000);
    }

    #[test]
    fn wait_mode_is_consistent() {
        let report = run_stress(&params(StressMode::Wait, None)).unwrap();
        assert!(report.ok);
        assert_eq!(report.popped, 6_000);
    }

    #[test]
    fn bounded_run_is_consistent() {
        let report = run_stress(&params(StressMode::Wait, Some(8))).unwrap();
        assert!(report.ok);
        assert_eq!(report.capacity, Some(8));
    }

    #[test]
    fn bounded_run_stops_at_deadline() {
        let params = StressParams {
            producers: 2,
            consumers: 1,
            items_per_producer: 5_000_000,
            mode: StressMode::Wait,
            capacity: Some(4),
            timeout: Duration::from_millis(50),
            wait: WaitConfig::default(),
        };

        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(run_stress(&params));
        });

        let report = rx
            .recv_timeout(Duration::from_secs(15))
            .expect("bounded run ignored its deadline")
            .unwrap();
        assert!(report.timed_out);
        assert!(report.unpushed > 0);
        assert_eq!(report.pushed + report.unpushed, report.requested);
        assert_eq!(report.popped + report.left_in_queue, report.pushed);
        assert!(report.ok);
    }

    #[test]
    fn oversized_run_is_rejected() {
        let mut huge = params(StressMode::Try, None);
        huge.items_per_producer = usize::MAX;
        let err = run_stress(&huge).unwrap_err();
        assert!(err.to_string().contains("item limit"));

        let mut big = params(StressMode::Try, None);
        big.producers = 2;
        big.items_per_producer = MAX_TOTAL_ITEMS;
        assert!(run_stress(&big).is_err());
    }

    #[test]
    fn zero_capacity_is_an_error() {
        assert!(run_stress(&params(StressMode::Try, Some(0))).is_err());
    }
}
