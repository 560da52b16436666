use std::collections::HashSet;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spantree::pipeline::report_stages;
use spantree::pool::LeaderFollowerPool;
use spantree_graph::{Graph, MstAlgorithm};

fn wait_for<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn every_item_is_dequeued_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let seen = Arc::clone(&seen);
        LeaderFollowerPool::start(4, move |item: usize| {
            seen.lock().unwrap().push(item);
        })
    };
    for i in 0..200 {
        pool.submit(i).unwrap();
    }
    wait_for(|| seen.lock().unwrap().len() == 200);
    let metrics = pool.metrics();
    pool.shutdown().unwrap();

    let items = seen.lock().unwrap();
    let unique: HashSet<usize> = items.iter().copied().collect();
    assert_eq!(unique.len(), 200, "an item was dropped or run twice");
    assert_eq!(metrics.dequeued, 200);
    assert_eq!(metrics.queue_length, 0);
}

#[test]
fn at_most_one_thread_dequeues_at_a_time() {
    // Slow handler keeps all workers busy so contention for the
    // leader slot is real.
    let pool = LeaderFollowerPool::start(8, |_: usize| {
        std::thread::sleep(Duration::from_millis(2));
    });
    let submitted = pool.submit_all(0..100).unwrap();
    assert_eq!(submitted, 100);
    wait_for(|| pool.metrics().dequeued == 100);
    let metrics = pool.metrics();
    pool.shutdown().unwrap();
    assert!(
        metrics.max_concurrent_dequeues <= 1,
        "leader-follower slot admitted {} concurrent dequeuers",
        metrics.max_concurrent_dequeues
    );
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let pool = LeaderFollowerPool::start(2, |_: usize| {});
    pool.shutdown().unwrap();
    assert!(pool.submit(1).is_err());
    assert!(pool.metrics().is_shutting_down);
}

#[test]
fn queued_items_are_never_processed_after_shutdown() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use spantree::CompletionLatch;

    let processed = Arc::new(AtomicUsize::new(0));
    let gate = CompletionLatch::new(1);
    let pool = {
        let processed = Arc::clone(&processed);
        let gate = gate.clone();
        LeaderFollowerPool::start(1, move |_: usize| {
            processed.fetch_add(1, Ordering::SeqCst);
            gate.wait();
        })
    };
    pool.submit_all(0..10).unwrap();
    wait_for(|| processed.load(Ordering::SeqCst) == 1);

    // Stop while the only worker is stuck inside the handler; the
    // nine queued items must be dropped, not processed.
    let stopper = std::thread::spawn(move || pool.shutdown());
    std::thread::sleep(Duration::from_millis(50));
    gate.arrive();
    stopper.join().unwrap().unwrap();
    assert_eq!(processed.load(Ordering::SeqCst), 1);
}

#[test]
fn report_group_writes_every_stage_line() {
    let (mut reader, writer) = UnixStream::pair().unwrap();
    let pool = LeaderFollowerPool::start_report(3);
    let stages = report_stages();

    // Path tree 0 -1- 1 -2- 2: weight 3, longest 3, average 2,
    // shortest edge 1.
    let mut g = Graph::new(3);
    g.add_edge(0, 1, 1.0).unwrap();
    g.add_edge(1, 2, 2.0).unwrap();
    let tree = MstAlgorithm::Kruskal.compute(&g);

    let latch = pool
        .submit_report_group(&stages, tree, writer.as_raw_fd())
        .unwrap();
    assert!(latch.wait_timeout(Duration::from_secs(5)));
    pool.shutdown().unwrap();
    drop(writer);

    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();
    assert!(out.contains("TotalWeight: 3\n"));
    assert!(out.contains("LongestDistance: 3\n"));
    assert!(out.contains("AverageDistance: 2\n"));
    assert!(out.contains("ShortestDistance: 1\n"));
}
