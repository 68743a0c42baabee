//! Multi-threaded correctness scenarios for [`faaqueue::Queue`], matching
//! the scenarios enumerated in the crate's design documentation: FIFO
//! ordering, the node-full boundary, exactly-once delivery under MPMC
//! contention, and destroy-after-drain.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use matches::assert_matches;
use rand::Rng;

use faaqueue::{Queue, SLOTS_PER_NODE};

fn make_item(value: usize) -> NonNull<()> {
    NonNull::new(Box::into_raw(Box::new(value)) as *mut ()).unwrap()
}

unsafe fn read_and_free(ptr: NonNull<()>) -> usize {
    let boxed = Box::from_raw(ptr.as_ptr() as *mut usize);
    *boxed
}

#[test]
fn single_threaded_fifo() {
    let queue = Queue::new(1);
    for v in [10usize, 20, 30] {
        queue.enqueue(make_item(v), 0);
    }

    for expected in [10usize, 20, 30] {
        let got = queue.dequeue(0).expect("queue should not be empty yet");
        assert_eq!(unsafe { read_and_free(got) }, expected);
    }
    assert_matches!(queue.dequeue(0), None);
}

#[test]
fn boundary_cross_exercises_node_full_path() {
    let queue = Queue::new(1);
    let n = SLOTS_PER_NODE * 2 + 50;

    for v in 0..n {
        queue.enqueue(make_item(v), 0);
    }
    for expected in 0..n {
        let got = queue.dequeue(0).expect("queue should not be empty yet");
        assert_eq!(unsafe { read_and_free(got) }, expected);
    }
    assert!(queue.dequeue(0).is_none());
}

#[test]
fn mpmc_exactly_once_delivery() {
    const PRODUCERS: usize = 8;
    const ITEMS_PER_PRODUCER: usize = 20_000;
    const CONSUMERS: usize = 8;
    const TOTAL: usize = PRODUCERS * ITEMS_PER_PRODUCER;

    // tids: producers use 0..PRODUCERS, consumers use PRODUCERS..PRODUCERS+CONSUMERS
    let queue = Arc::new(Queue::new(PRODUCERS + CONSUMERS));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..ITEMS_PER_PRODUCER {
                    // globally unique id across all producers
                    let value = p * ITEMS_PER_PRODUCER + i;
                    queue.enqueue(make_item(value), p);
                    // occasional yield to vary producer/consumer interleaving
                    if rng.gen_ratio(1, 2_000) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let seen: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::with_capacity(TOTAL)));
    let dequeued_count = Arc::new(AtomicUsize::new(0));
    let duplicate = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|c| {
            let queue = Arc::clone(&queue);
            let seen = Arc::clone(&seen);
            let dequeued_count = Arc::clone(&dequeued_count);
            let duplicate = Arc::clone(&duplicate);
            thread::spawn(move || {
                let tid = PRODUCERS + c;
                loop {
                    if dequeued_count.load(Ordering::Acquire) >= TOTAL {
                        break;
                    }
                    if let Some(item) = queue.dequeue(tid) {
                        let value = unsafe { read_and_free(item) };
                        let inserted = seen.lock().unwrap().insert(value);
                        if !inserted {
                            duplicate.fetch_add(1, Ordering::Relaxed);
                        }
                        dequeued_count.fetch_add(1, Ordering::AcqRel);
                    }
                }
            })
        })
        .collect();
    for c in consumers {
        c.join().unwrap();
    }

    assert_eq!(duplicate.load(Ordering::Relaxed), 0, "no value should be delivered twice");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), TOTAL, "every produced value must be delivered exactly once");
    assert!((0..TOTAL).all(|v| seen.contains(&v)));

    assert!(queue.dequeue(0).is_none());
}

#[test]
fn racing_producer_and_consumer_on_the_same_index() {
    // Approximates the deterministic empty-slot race (scenario 5): a
    // producer that has claimed an index but stalls before writing loses
    // the race to a consumer exchanging the same index, must retry, and
    // the item is eventually delivered exactly once.
    for _ in 0..200 {
        let queue = Arc::new(Queue::new(2));
        let item = 7usize;

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            thread::yield_now();
            producer_queue.enqueue(make_item(item), 0);
        });

        let mut got = None;
        while got.is_none() {
            got = queue.dequeue(1);
        }
        producer.join().unwrap();

        assert_eq!(unsafe { read_and_free(got.unwrap()) }, item);
        assert!(queue.dequeue(1).is_none());
    }
}

#[test]
fn destroy_after_drain_under_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const ITEMS_PER_PRODUCER: usize = 5_000;

    let queue = Arc::new(Queue::new(PRODUCERS));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..ITEMS_PER_PRODUCER {
                    queue.enqueue(make_item(p * ITEMS_PER_PRODUCER + i), p);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let mut drained = 0;
    while let Some(item) = queue.dequeue(0) {
        unsafe { read_and_free(item) };
        drained += 1;
    }
    assert_eq!(drained, PRODUCERS * ITEMS_PER_PRODUCER);

    drop(Arc::try_unwrap(queue).unwrap_or_else(|_| panic!("queue still shared")));
}
