use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct LatchState {
    remaining: usize,
    done: bool,
}

/// A countdown latch: one waiter blocks until N parties have arrived.
///
/// The counter and the done flag live under the same mutex, so the
/// false-to-true transition of `done` happens exactly once, triggered
/// by whichever arrival observes the counter reach zero. Waiters
/// re-check the predicate, so spurious wakeups are harmless.
///
/// Arriving more times than the latch was constructed for is a
/// programming error (a stage ran twice or the latch was mis-sized)
/// and panics rather than going negative.
#[derive(Clone)]
pub struct CompletionLatch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl CompletionLatch {
    /// Creates a latch expecting `count` arrivals. A zero-count latch
    /// is born completed.
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(LatchState {
                    remaining: count,
                    done: count == 0,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Records one completion. The arrival that brings the counter to
    /// zero sets the done flag and wakes all waiters.
    pub fn arrive(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("latch mutex poisoned");
        assert!(
            state.remaining > 0,
            "completion latch over-arrived: more completions than expected"
        );
        state.remaining -= 1;
        if state.remaining == 0 {
            state.done = true;
            cvar.notify_all();
        }
    }

    /// Blocks until every expected arrival has occurred.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("latch mutex poisoned");
        while !state.done {
            state = cvar.wait(state).expect("latch mutex poisoned");
        }
    }

    /// Blocks up to `timeout`; returns true when the latch completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("latch mutex poisoned");
        while !state.done {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = cvar
                .wait_timeout(state, deadline - now)
                .expect("latch mutex poisoned");
            state = next;
        }
        true
    }

    /// True once all arrivals have occurred. Snapshot only.
    pub fn is_done(&self) -> bool {
        self.inner.0.lock().expect("latch mutex poisoned").done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_latch_is_immediately_done() {
        let latch = CompletionLatch::new(0);
        assert!(latch.is_done());
        latch.wait();
    }

    #[test]
    #[should_panic(expected = "over-arrived")]
    fn over_arrival_panics() {
        let latch = CompletionLatch::new(1);
        latch.arrive();
        latch.arrive();
    }
}
