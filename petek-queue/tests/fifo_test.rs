use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use petek_queue::Queue;

#[test]
fn test_fifo_simple() {
    let q = Queue::new();
    q.push(1);
    q.push(2);
    assert_eq!(q.front(), Some(1));
    assert_eq!(q.back(), Some(2));
    assert_eq!(q.pop(), Some(1));
    assert_eq!(q.pop(), Some(2));
    assert_eq!(q.pop(), None);
    assert_eq!(q.front(), None);
    assert_eq!(q.back(), None);
}

#[test]
fn test_single_producer_order() {
    // one producer, one consumer: the popped sequence is exactly the pushed one
    let q = Queue::new();
    for i in 1..=1000 {
        q.push(i);
    }
    assert_eq!(q.len(), 1000);
    for i in 1..=1000 {
        assert_eq!(q.pop(), Some(i));
    }
    assert_eq!(q.pop(), None);
    assert!(q.is_empty());
}

#[test]
fn test_reserve_and_clear() {
    let q: Queue<u32> = Queue::with_capacity(128);
    assert!(q.capacity() >= 128);
    for i in 0..100 {
        q.push(i);
    }
    q.clear();
    assert!(q.is_empty());
    assert_eq!(q.pop(), None);
}

#[test]
fn test_owned_values_dropped() {
    // heap-owning payloads survive recycling and teardown
    let q = Queue::new();
    for i in 0..100 {
        q.push(format!("value-{}", i));
    }
    for i in 0..50 {
        assert_eq!(q.pop().as_deref(), Some(format!("value-{}", i).as_str()));
    }
    // remaining 50 strings dropped with the queue
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_mpmc_conservation_and_per_producer_order() {
    // four producers push tagged sequences, four consumers drain; the popped
    // multiset matches the pushed one and each producer's values stay in
    // push order within every consumer's observed stream
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 250;

    let q = Arc::new(Queue::new());
    let mut handles = vec![];

    for tid in 0..PRODUCERS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                q.push((tid, i));
            }
        }));
    }

    let remaining = Arc::new(std::sync::atomic::AtomicI64::new(
        (PRODUCERS * PER_PRODUCER) as i64,
    ));
    let mut consumers = vec![];
    for _ in 0..CONSUMERS {
        let q = q.clone();
        let remaining = remaining.clone();
        consumers.push(thread::spawn(move || {
            use std::sync::atomic::Ordering;
            let mut seen: Vec<(u64, u64)> = Vec::new();
            while remaining.load(Ordering::Acquire) > 0 {
                match q.pop() {
                    Some(pair) => {
                        seen.push(pair);
                        remaining.fetch_sub(1, Ordering::AcqRel);
                    }
                    None => thread::yield_now(),
                }
            }
            seen
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    let mut all: Vec<(u64, u64)> = Vec::new();
    for c in consumers {
        let seen = c.join().unwrap();
        // per-producer FIFO order within this consumer's stream
        let mut last: HashMap<u64, u64> = HashMap::new();
        for (tid, i) in &seen {
            if let Some(prev) = last.get(tid) {
                assert!(i > prev, "producer {} reordered: {} after {}", tid, i, prev);
            }
            last.insert(*tid, *i);
        }
        all.extend(seen);
    }
    // drain stragglers
    while let Some(pair) = q.pop() {
        all.push(pair);
    }

    assert_eq!(all.len() as u64, PRODUCERS * PER_PRODUCER);
    let mut counts: HashMap<u64, u64> = HashMap::new();
    for (tid, _) in &all {
        *counts.entry(*tid).or_default() += 1;
    }
    for tid in 0..PRODUCERS {
        assert_eq!(counts[&tid], PER_PRODUCER);
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_heavy_churn() {
    // long-running mixed workload to stress handle recycling and tags
    const NUM_THREADS: usize = 8;
    const ITERATIONS: usize = 50000;

    let q = Arc::new(Queue::new());
    let mut handles = vec![];
    for tid in 0..NUM_THREADS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ITERATIONS {
                q.push(tid * ITERATIONS + i);
                if i % 3 != 0 {
                    q.pop();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    while q.pop().is_some() {}
    assert!(q.is_empty());
}
