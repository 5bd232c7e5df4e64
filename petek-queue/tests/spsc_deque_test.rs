use std::sync::Arc;
use std::thread;

use petek_queue::SpscDeque;

#[test]
fn test_grow_on_full() {
    // capacity 3 forces an expansion on the fourth push
    let d = SpscDeque::new(3);
    assert_eq!(d.capacity(), 3);
    d.push_back(1);
    d.push_back(2);
    d.push_front(0);
    d.push_back(3);
    assert!(d.capacity() > 3);
    assert_eq!(d.pop_front(), Some(0));
    assert_eq!(d.pop_front(), Some(1));
    assert_eq!(d.pop_front(), Some(2));
    assert_eq!(d.pop_front(), Some(3));
    assert_eq!(d.pop_front(), None);
}

#[test]
fn test_same_end_stack_semantics() {
    let d = SpscDeque::new(0);
    for i in 0..10 {
        d.push_back(i);
    }
    for i in (0..10).rev() {
        assert_eq!(d.pop_back(), Some(i));
    }
    assert_eq!(d.pop_back(), None);

    for i in 0..10 {
        d.push_front(i);
    }
    for i in (0..10).rev() {
        assert_eq!(d.pop_front(), Some(i));
    }
    assert_eq!(d.pop_front(), None);
}

#[test]
fn test_cross_end_fifo() {
    let d = SpscDeque::new(4);
    for i in 0..100 {
        d.push_back(i);
    }
    for i in 0..100 {
        assert_eq!(d.pop_front(), Some(i));
    }
    assert!(d.is_empty());
}

#[test]
fn test_wraparound() {
    let d = SpscDeque::new(4);
    for round in 0..50 {
        d.push_back(round * 2);
        d.push_back(round * 2 + 1);
        assert_eq!(d.pop_front(), Some(round * 2));
        assert_eq!(d.pop_front(), Some(round * 2 + 1));
    }
    assert!(d.is_empty());
    assert_eq!(d.capacity(), 4);
}

#[test]
fn test_reserve() {
    let d: SpscDeque<u32> = SpscDeque::new(0);
    assert_eq!(d.capacity(), 0);
    d.reserve(10);
    assert!(d.capacity() >= 10);
    let cap = d.capacity();
    d.reserve(5);
    assert_eq!(d.capacity(), cap);
}

#[test]
fn test_resize_grows_with_fill() {
    let d = SpscDeque::new(0);
    d.push_back(1);
    d.push_back(2);
    // existing elements are preserved, the remainder is filled
    d.resize(5, 9);
    assert_eq!(d.len(), 5);
    assert_eq!(d.pop_front(), Some(1));
    assert_eq!(d.pop_front(), Some(2));
    assert_eq!(d.pop_front(), Some(9));
    assert_eq!(d.pop_front(), Some(9));
    assert_eq!(d.pop_front(), Some(9));
    assert_eq!(d.pop_front(), None);
}

#[test]
fn test_resize_shrinks_from_back() {
    let d = SpscDeque::new(0);
    for i in 0..6 {
        d.push_back(i);
    }
    d.resize(2, 0);
    assert_eq!(d.len(), 2);
    assert_eq!(d.pop_front(), Some(0));
    assert_eq!(d.pop_front(), Some(1));
    assert_eq!(d.pop_front(), None);
}

#[test]
fn test_clear() {
    let d = SpscDeque::new(0);
    for i in 0..20 {
        d.push_front(i);
    }
    d.clear();
    assert!(d.is_empty());
    assert_eq!(d.pop_back(), None);
}

#[test]
fn test_owned_values() {
    let d = SpscDeque::new(2);
    d.push_back(String::from("a"));
    d.push_back(String::from("b"));
    d.push_back(String::from("c"));
    assert_eq!(d.pop_front().as_deref(), Some("a"));
    // "b" and "c" dropped with the deque
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_spsc_pipeline() {
    // the intended deployment: one producer at the back, one consumer at
    // the front
    const COUNT: u64 = 200000;
    let d = Arc::new(SpscDeque::new(64));

    let producer = {
        let d = d.clone();
        thread::spawn(move || {
            for i in 0..COUNT {
                d.push_back(i);
            }
        })
    };
    let consumer = {
        let d = d.clone();
        thread::spawn(move || {
            let mut expect = 0;
            while expect < COUNT {
                if let Some(v) = d.pop_front() {
                    assert_eq!(v, expect);
                    expect += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    assert!(d.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_two_ended_contention() {
    // contention across both ends is legal, just slower
    const COUNT: usize = 50000;
    let d = Arc::new(SpscDeque::new(0));
    let total = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let front = {
        let d = d.clone();
        let total = total.clone();
        thread::spawn(move || {
            for i in 0..COUNT {
                d.push_front(i);
                if d.pop_front().is_some() {
                    total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        })
    };
    let back = {
        let d = d.clone();
        let total = total.clone();
        thread::spawn(move || {
            for i in 0..COUNT {
                d.push_back(i);
                if d.pop_back().is_some() {
                    total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        })
    };

    front.join().unwrap();
    back.join().unwrap();
    while d.pop_back().is_some() {
        total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    assert_eq!(total.load(std::sync::atomic::Ordering::Relaxed), 2 * COUNT);
}
