use std::sync::{Arc, Barrier};
use std::thread;

use petek_list::List;

#[test]
fn test_push_front_orders() {
    let list: List<char> = List::new(1);
    list.push_front('A');
    list.push_front('B');
    list.push_front('C');

    assert_eq!(list.iter().collect::<Vec<_>>(), vec!['C', 'B', 'A']);

    let mut reverse = Vec::new();
    let mut cursor = list.rbegin();
    while !cursor.at_end() {
        if let Some(v) = cursor.get() {
            reverse.push(v);
        }
        cursor.move_next();
    }
    assert_eq!(reverse, vec!['A', 'B', 'C']);
}

#[test]
fn test_push_pop_both_ends() {
    let list: List<i32> = List::new(1);
    list.push_back(1);
    list.push_back(2);
    list.push_front(0);
    assert_eq!(list.len(), 3);
    assert_eq!(list.front(), Some(0));
    assert_eq!(list.back(), Some(2));
    assert_eq!(list.pop_front(), Some(0));
    assert_eq!(list.pop_back(), Some(2));
    assert_eq!(list.pop_back(), Some(1));
    assert_eq!(list.pop_back(), None);
    assert_eq!(list.pop_front(), None);
    assert!(list.is_empty());
}

#[test]
fn test_cursor_insert() {
    let list: List<i32> = List::new(1);
    list.push_back(1);
    list.push_back(3);

    // position on 3 and insert before it
    let mut cursor = list.begin();
    cursor.move_next();
    cursor.insert(2);
    assert!(cursor.valid());
    assert_eq!(cursor.get(), Some(2));

    assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(list.len(), 3);

    // insert at the end sentinel appends
    let mut cursor = list.end();
    cursor.insert(4);
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}

#[test]
fn test_cursor_erase_advances() {
    let list: List<i32> = List::new(1);
    for i in 0..5 {
        list.push_back(i);
    }
    let mut cursor = list.begin();
    cursor.move_next();
    assert_eq!(cursor.erase(), Some(1));
    assert_eq!(cursor.get(), Some(2));
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![0, 2, 3, 4]);
    assert_eq!(list.len(), 4);
}

#[test]
fn test_erase_already_deleted() {
    let list: List<i32> = List::new(1);
    list.push_back(7);
    let mut first = list.begin();
    let mut second = first.clone();
    assert_eq!(first.erase(), Some(7));
    // the other cursor sits on the deleted node; it must lose
    assert_eq!(second.erase(), None);
    assert!(list.is_empty());
}

#[test]
fn test_clear() {
    let list: List<i32> = List::new(1);
    for i in 0..100 {
        list.push_back(i);
    }
    list.clear();
    assert!(list.is_empty());
    assert_eq!(list.iter().count(), 0);
    // reusable after clear
    list.push_back(1);
    assert_eq!(list.front(), Some(1));
}

#[test]
fn test_owned_values() {
    let list: List<String> = List::new(1);
    list.push_back("a".to_string());
    list.push_back("b".to_string());
    assert_eq!(list.pop_front().as_deref(), Some("a"));
    // "b" dropped with the list
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_erase_tie_break() {
    // two racing erasers on the same node: exactly one wins the value
    const ROUNDS: usize = 200;
    for _ in 0..ROUNDS {
        let list: Arc<List<i32>> = Arc::new(List::new(3));
        list.push_back(42);
        let barrier = Arc::new(Barrier::new(2));

        let mut handles = vec![];
        for _ in 0..2 {
            let list = list.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let mut cursor = list.begin();
                barrier.wait();
                cursor.erase().is_some()
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert!(list.is_empty());
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_traversal_during_mutation() {
    // readers walk the list while writers churn both ends; cursors must
    // only ever observe live values
    const WRITERS: usize = 2;
    const READERS: usize = 2;
    const ITERATIONS: usize = 10000;

    let list: Arc<List<usize>> = Arc::new(List::new(WRITERS + READERS + 1));
    let mut handles = vec![];

    for tid in 0..WRITERS {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ITERATIONS {
                if i % 2 == 0 {
                    list.push_back(tid * ITERATIONS + i);
                } else if tid % 2 == 0 {
                    list.pop_front();
                } else {
                    list.pop_back();
                }
            }
        }));
    }
    for _ in 0..READERS {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let count = list.iter().count();
                assert!(count <= ITERATIONS * WRITERS);
                thread::yield_now();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}
