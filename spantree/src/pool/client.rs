//! The plain client worker pool.
//!
//! N threads block on one shared queue of [`ClientJob`]s. Serving a
//! job means one blocking read on the checked-out descriptor, a
//! command dispatch against the connection's session state, and
//! exactly one handback record into the control pipe, the invariant
//! the multiplexer's descriptor accounting rests on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::commands;
use crate::error::PoolError;
use crate::pipeline::Pipeline;
use crate::pool::leader_follower::{LeaderFollowerPool, ReportJob};
use crate::server::conn::{ClientJob, ConnectionHandle, SessionRegistry};
use crate::server::handback::{self, HandbackRecord};

/// Everything a worker needs to serve one connection: the shared
/// session registry for parking state on handback, the report
/// pipeline that report commands submit to, and an optional
/// leader-follower pool running the grouped second report phase.
pub struct ServeDeps {
    pub registry: SessionRegistry,
    pub pipeline: Arc<Pipeline>,
    pub report_pool: Option<Arc<LeaderFollowerPool<ReportJob>>>,
    pub read_buffer_size: usize,
}

/// Fixed-size pool of connection-serving threads over a shared
/// `flume` queue. Shutdown raises a stop flag, then delivers one
/// wake-up sentinel per worker; the flag is checked after every
/// dequeue, so queued jobs are dropped rather than served once
/// shutdown begins.
pub struct ClientWorkerPool {
    tx: flume::Sender<ClientJob>,
    stop: Arc<AtomicBool>,
    size: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientWorkerPool {
    pub fn start(size: usize, deps: Arc<ServeDeps>) -> Self {
        let (tx, rx) = flume::unbounded::<ClientJob>();
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let rx = rx.clone();
            let stop = Arc::clone(&stop);
            let deps = Arc::clone(&deps);
            let handle = std::thread::Builder::new()
                .name(format!("client-worker-{id}"))
                .spawn(move || worker_loop(id, rx, stop, deps))
                .expect("failed to spawn client worker thread");
            handles.push(handle);
        }
        Self {
            tx,
            stop,
            size,
            handles: Mutex::new(handles),
        }
    }

    /// Enqueues a checked-out connection for service.
    pub fn submit(&self, handle: ConnectionHandle) -> Result<(), PoolError> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        self.tx
            .send(ClientJob::Serve(handle))
            .map_err(|_| PoolError::QueueClosed)
    }

    /// Raises the stop flag, wakes every worker, and joins them.
    /// In-flight jobs complete; queued jobs are dropped with their
    /// descriptors closed.
    pub fn shutdown(&self) -> Result<(), PoolError> {
        self.stop.store(true, Ordering::SeqCst);
        for _ in 0..self.size {
            let _ = self.tx.send(ClientJob::Shutdown);
        }
        let mut handles = self.handles.lock().expect("pool handles poisoned");
        let mut result = Ok(());
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                result = Err(PoolError::JoinFailed);
            }
        }
        result
    }
}

fn worker_loop(
    id: usize,
    rx: flume::Receiver<ClientJob>,
    stop: Arc<AtomicBool>,
    deps: Arc<ServeDeps>,
) {
    debug!(worker = id, "client worker started");
    while let Ok(job) = rx.recv() {
        if stop.load(Ordering::SeqCst) {
            if let ClientJob::Serve(handle) = job {
                debug!(worker = id, fd = handle.conn.raw(), "dropping job on shutdown");
                handle.conn.close();
            }
            break;
        }
        match job {
            ClientJob::Serve(handle) => serve_connection(handle, &deps),
            ClientJob::Shutdown => break,
        }
    }
    debug!(worker = id, "client worker stopped");
}

/// Serves one checked-out connection and produces exactly one
/// handback record. Shared by both dispatch disciplines.
pub fn serve_connection(handle: ConnectionHandle, deps: &ServeDeps) {
    let ConnectionHandle {
        conn,
        ctl_write,
        state,
    } = handle;
    let fd = conn.raw();

    let mut buf = vec![0u8; deps.read_buffer_size];
    let nbytes = match conn.read(&mut buf) {
        Ok(n) => n,
        Err(err) => {
            warn!(fd, error = %err, "recv failed, closing connection");
            0
        }
    };

    if nbytes == 0 {
        info!(fd, "peer closed connection");
        conn.close();
        drop(state);
        let record = HandbackRecord::invalidate(fd, ctl_write);
        if let Err(err) = handback::write_record(ctl_write, &record) {
            warn!(fd, error = %err, "failed to write invalidation handback");
        }
        return;
    }

    let input = String::from_utf8_lossy(&buf[..nbytes]);
    debug!(fd, command = input.trim_end(), "dispatching command");

    let new_state = commands::dispatch(state, &input, &conn, deps);

    // Park the state first: the multiplexer resolves the record
    // against the registry, so ordering here is load-bearing.
    deps.registry.park(fd, new_state);
    let record = HandbackRecord::register(fd, ctl_write);
    if let Err(err) = handback::write_record(ctl_write, &record) {
        warn!(fd, error = %err, "failed to write handback record");
        deps.registry.remove(fd);
        conn.close();
    }
    // On success the descriptor is back under the multiplexer's
    // ownership; dropping `conn` does not close the fd.
}
