//! Leader-follower worker pool.
//!
//! N threads contend for a single leader slot. Only the slot holder
//! may dequeue; it vacates the slot and wakes contenders *before*
//! processing the item outside the lock, so throughput serializes on
//! the handoff, never on the work. Guarantees: at most one thread is
//! ever inside the dequeue critical section, and every item is
//! dequeued at most once. FIFO order across the whole pool is not
//! guaranteed.
//!
//! An atomic gauge brackets the dequeue critical section so tests can
//! assert the single-dequeuer invariant directly.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use spantree_graph::SpanningTree;
use tracing::{debug, error, warn};

use crate::error::PoolError;
use crate::fdio;
use crate::pipeline::StageSpec;
use crate::sync::latch::CompletionLatch;

struct LfState<T> {
    queue: VecDeque<T>,
    leader: Option<usize>,
    stop: bool,
}

struct Shared<T> {
    state: Mutex<LfState<T>>,
    cond: Condvar,
    in_dequeue: AtomicUsize,
    max_in_dequeue: AtomicUsize,
    dequeued: AtomicUsize,
}

/// Snapshot of pool counters, exposed for tests and logging.
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
    pub queue_length: usize,
    pub dequeued: usize,
    /// High-water mark of threads simultaneously inside the dequeue
    /// critical section. The leader-follower discipline holds this
    /// at 1.
    pub max_concurrent_dequeues: usize,
    pub is_shutting_down: bool,
}

/// Generic leader-follower pool running `handler` over submitted
/// items.
pub struct LeaderFollowerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> LeaderFollowerPool<T> {
    pub fn start<F>(size: usize, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(LfState {
                queue: VecDeque::new(),
                leader: None,
                stop: false,
            }),
            cond: Condvar::new(),
            in_dequeue: AtomicUsize::new(0),
            max_in_dequeue: AtomicUsize::new(0),
            dequeued: AtomicUsize::new(0),
        });
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let shared = Arc::clone(&shared);
            let handler = Arc::clone(&handler);
            let handle = std::thread::Builder::new()
                .name(format!("lf-worker-{id}"))
                .spawn(move || follower_loop(id, shared, handler))
                .expect("failed to spawn leader-follower thread");
            handles.push(handle);
        }
        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Enqueues one item and wakes contenders.
    pub fn submit(&self, item: T) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock().expect("lf pool mutex poisoned");
        if state.stop {
            return Err(PoolError::ShuttingDown);
        }
        state.queue.push_back(item);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Enqueues a batch under one lock acquisition. Returns the number
    /// of items enqueued.
    pub fn submit_all<I>(&self, items: I) -> Result<usize, PoolError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut state = self.shared.state.lock().expect("lf pool mutex poisoned");
        if state.stop {
            return Err(PoolError::ShuttingDown);
        }
        let mut count = 0;
        for item in items {
            state.queue.push_back(item);
            count += 1;
        }
        self.shared.cond.notify_all();
        Ok(count)
    }

    /// Raises the stop flag, wakes every blocked contender, and joins
    /// the threads. Queued items are dropped unprocessed: nothing runs
    /// after the flag is observed.
    pub fn shutdown(&self) -> Result<(), PoolError> {
        {
            let mut state = self.shared.state.lock().expect("lf pool mutex poisoned");
            state.stop = true;
            self.shared.cond.notify_all();
        }
        let mut handles = self.handles.lock().expect("lf pool handles poisoned");
        let mut result = Ok(());
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                result = Err(PoolError::JoinFailed);
            }
        }
        result
    }

    pub fn metrics(&self) -> PoolMetrics {
        let state = self.shared.state.lock().expect("lf pool mutex poisoned");
        PoolMetrics {
            queue_length: state.queue.len(),
            dequeued: self.shared.dequeued.load(Ordering::SeqCst),
            max_concurrent_dequeues: self.shared.max_in_dequeue.load(Ordering::SeqCst),
            is_shutting_down: state.stop,
        }
    }
}

fn follower_loop<T: Send + 'static>(
    id: usize,
    shared: Arc<Shared<T>>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
) {
    debug!(worker = id, "leader-follower worker started");
    loop {
        let item;
        {
            let mut state = shared.state.lock().expect("lf pool mutex poisoned");

            // Contend for the leader slot.
            while state.leader.is_some() && !state.stop {
                state = shared.cond.wait(state).expect("lf pool mutex poisoned");
            }
            if state.stop {
                break;
            }
            state.leader = Some(id);

            // As leader, wait for work.
            while state.queue.is_empty() && !state.stop {
                state = shared.cond.wait(state).expect("lf pool mutex poisoned");
            }
            if state.stop {
                state.leader = None;
                shared.cond.notify_all();
                break;
            }

            // Dequeue critical section: the slot guarantees we are
            // the only thread in here.
            let n = shared.in_dequeue.fetch_add(1, Ordering::SeqCst) + 1;
            shared.max_in_dequeue.fetch_max(n, Ordering::SeqCst);
            item = state.queue.pop_front().expect("queue checked non-empty");
            shared.dequeued.fetch_add(1, Ordering::SeqCst);
            shared.in_dequeue.fetch_sub(1, Ordering::SeqCst);

            // Hand leadership off before processing.
            state.leader = None;
            shared.cond.notify_all();
        }
        handler(item);
    }
    debug!(worker = id, "leader-follower worker stopped");
}

/// A grouped report task for the leader-follower pool: one stage's
/// rendering of a shared spanning tree, tied to the group's latch.
pub struct ReportJob {
    pub stage: StageSpec,
    pub tree: Arc<SpanningTree>,
    pub dest: RawFd,
    pub latch: CompletionLatch,
}

impl LeaderFollowerPool<ReportJob> {
    /// Starts a pool whose handler renders report lines and arrives on
    /// each job's latch.
    pub fn start_report(size: usize) -> Self {
        Self::start(size, |job: ReportJob| {
            let line = (job.stage.render)(&job.tree);
            if let Err(err) = fdio::write_all(job.dest, line.as_bytes()) {
                error!(stage = job.stage.name, error = %err, "failed to write report line");
            }
            job.latch.arrive();
        })
    }

    /// Submits one job per stage for `tree`; the returned latch
    /// completes when every stage's line has been written.
    pub fn submit_report_group(
        &self,
        stages: &[StageSpec],
        tree: SpanningTree,
        dest: RawFd,
    ) -> Result<CompletionLatch, PoolError> {
        let latch = CompletionLatch::new(stages.len());
        let tree = Arc::new(tree);
        let jobs: Vec<ReportJob> = stages
            .iter()
            .map(|stage| ReportJob {
                stage: *stage,
                tree: Arc::clone(&tree),
                dest,
                latch: latch.clone(),
            })
            .collect();
        let submitted = self.submit_all(jobs)?;
        if submitted != stages.len() {
            warn!(submitted, expected = stages.len(), "partial report group submission");
        }
        Ok(latch)
    }
}
