//! Throughput benchmarks for the Petek containers

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use petek_list::List;
use petek_queue::{Queue, SpscDeque};

fn bench_queue_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    group.throughput(Throughput::Elements(1));
    group.bench_function("petek_queue", |b| {
        let q = Queue::with_capacity(1024);
        b.iter(|| {
            q.push(black_box(1u64));
            black_box(q.pop());
        });
    });

    group.bench_function("mutex_vecdeque", |b| {
        let q = Mutex::new(VecDeque::with_capacity(1024));
        b.iter(|| {
            q.lock().unwrap().push_back(black_box(1u64));
            black_box(q.lock().unwrap().pop_front());
        });
    });

    group.finish();
}

fn bench_queue_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");

    for threads in [2usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(10000));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            threads,
            |b, &threads| {
                b.iter(|| {
                    let q = Arc::new(Queue::with_capacity(1024));
                    let handles: Vec<_> = (0..threads)
                        .map(|tid| {
                            let q = q.clone();
                            thread::spawn(move || {
                                let per_thread = 10000 / threads;
                                for i in 0..per_thread {
                                    q.push((tid * per_thread + i) as u64);
                                    if i % 2 == 0 {
                                        black_box(q.pop());
                                    }
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                    while q.pop().is_some() {}
                });
            },
        );
    }

    group.finish();
}

fn bench_list_ends(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_ends");

    group.throughput(Throughput::Elements(1));
    group.bench_function("push_back_pop_front", |b| {
        let list: List<u64> = List::new(2);
        b.iter(|| {
            list.push_back(black_box(1));
            black_box(list.pop_front());
        });
    });

    group.finish();
}

fn bench_spsc_deque(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_deque");

    group.throughput(Throughput::Elements(1));
    group.bench_function("push_back_pop_front", |b| {
        let d = SpscDeque::new(1024);
        b.iter(|| {
            d.push_back(black_box(1u64));
            black_box(d.pop_front());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_single_thread,
    bench_queue_contended,
    bench_list_ends,
    bench_spsc_deque
);
criterion_main!(benches);
