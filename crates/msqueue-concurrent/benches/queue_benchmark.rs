use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use msqueue_concurrent::{BoundedQueue, LinkedQueue};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");
    for &size in &[100usize, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push_then_pop", size), &size, |b, &n| {
            let queue = LinkedQueue::new();
            b.iter(|| {
                for i in 0..n {
                    queue.push(black_box(i));
                }
                while let Some(v) = queue.try_pop() {
                    black_box(v);
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("bounded_interleaved", size), &size, |b, &n| {
            let queue = BoundedQueue::new(64).unwrap();
            b.iter(|| {
                for i in 0..n {
                    let _ = queue.try_push(black_box(i));
                    black_box(queue.try_pop());
                }
            });
        });
    }
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    const ITEMS: usize = 20_000;
    group.throughput(Throughput::Elements(ITEMS as u64));

    for &threads in &[2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("mpmc", threads), &threads, |b, &t| {
            b.iter(|| {
                let queue = Arc::new(LinkedQueue::new());
                let per_thread = ITEMS / t;
                let producers: Vec<_> = (0..t)
                    .map(|_| {
                        let queue = queue.clone();
                        thread::spawn(move || {
                            for i in 0..per_thread {
                                queue.push(i);
                            }
                        })
                    })
                    .collect();
                let consumers: Vec<_> = (0..t)
                    .map(|_| {
                        let queue = queue.clone();
                        thread::spawn(move || {
                            for _ in 0..per_thread {
                                black_box(queue.wait_pop());
                            }
                        })
                    })
                    .collect();
                for h in producers.into_iter().chain(consumers) {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
