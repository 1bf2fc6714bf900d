//! Integration tests for the wait-free-enqueue / blocking-dequeue queue
//! under real concurrent producers.

use std::time::Duration;

use urcu_rs::Queue;

/// Poll `dequeue_blocking` until it yields a value, treating a `None`
/// ("empty" is a normal return, not an error) as "try again" rather than
/// as a terminal result — the behavior any real consumer loop needs when
/// it may legitimately race ahead of its producers.
fn drain_one<T>(queue: &Queue<T>) -> T {
    loop {
        if let Some(value) = queue.dequeue_blocking() {
            return value;
        }
    }
}

#[test]
fn eight_producers_preserve_per_producer_order() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 10_000;

    let queue: Box<Queue<(usize, usize)>> = Queue::new();
    let queue: &Queue<(usize, usize)> = &queue;

    std::thread::scope(|scope| {
        for p in 0..PRODUCERS {
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.enqueue((p, i));
                }
            });
        }

        let mut last_seen = vec![None; PRODUCERS];
        let mut per_producer_counts = vec![0usize; PRODUCERS];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let (producer, value) = drain_one(queue);
            if let Some(last) = last_seen[producer] {
                assert!(value > last, "producer {producer} delivered out of order");
            }
            last_seen[producer] = Some(value);
            per_producer_counts[producer] += 1;
        }

        assert_eq!(per_producer_counts, vec![PER_PRODUCER; PRODUCERS]);
    });
}

#[test]
fn concurrent_enqueue_and_dequeue_never_spuriously_blocks_forever() {
    // Stresses the window between a producer's tail exchange and its
    // subsequent `next` store: a dequeuer racing that window must keep
    // waiting rather than conclude the queue is empty once it is not.
    let queue: Box<Queue<usize>> = Queue::new();
    let queue: &Queue<usize> = &queue;
    const ROUNDS: usize = 5_000;

    std::thread::scope(|scope| {
        let producer = scope.spawn(move || {
            for i in 0..ROUNDS {
                queue.enqueue(i);
            }
        });

        let mut received = Vec::with_capacity(ROUNDS);
        for _ in 0..ROUNDS {
            received.push(drain_one(queue));
        }
        producer.join().unwrap();

        assert_eq!(received, (0..ROUNDS).collect::<Vec<_>>());
    });
}

#[test]
fn dequeue_blocking_returns_none_immediately_on_a_genuinely_empty_queue() {
    let queue: Box<Queue<i32>> = Queue::new();
    let start = std::time::Instant::now();
    assert_eq!(queue.dequeue_blocking(), None);
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn dequeue_waits_out_an_in_flight_enqueue_instead_of_reporting_empty() {
    let queue: Box<Queue<i32>> = Queue::new();
    let queue: &'static Queue<i32> = Box::leak(queue);

    let consumer = std::thread::spawn(move || drain_one(queue));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!consumer.is_finished());

    queue.enqueue(99);
    assert_eq!(consumer.join().unwrap(), 99);
}
