//! Server assembly: the context object owning every long-lived piece.
//!
//! Pools and the pipeline are constructed and owned here explicitly,
//! with no process-wide singletons, so shutdown order is visible and
//! tests can run several independent servers in one process.

pub mod conn;
pub mod handback;
pub mod mux;

use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::config::{DispatchMode, ServerConfig};
use crate::error::{PoolError, ServerError};
use crate::fdio;
use crate::pipeline::Pipeline;
use crate::pool::client::{self, ClientWorkerPool, ServeDeps};
use crate::pool::leader_follower::{LeaderFollowerPool, ReportJob};
use conn::{ConnectionHandle, SessionRegistry};
use mux::Multiplexer;

/// The active worker-dispatch discipline for checked-out connections.
/// Both variants run the same per-connection serve path; they differ
/// only in how threads contend for the queue.
pub enum Dispatcher {
    Pool(ClientWorkerPool),
    LeaderFollower(LeaderFollowerPool<ConnectionHandle>),
}

impl Dispatcher {
    fn start(mode: DispatchMode, size: usize, deps: Arc<ServeDeps>) -> Self {
        match mode {
            DispatchMode::Pool => Dispatcher::Pool(ClientWorkerPool::start(size, deps)),
            DispatchMode::LeaderFollower => {
                Dispatcher::LeaderFollower(LeaderFollowerPool::start(size, move |handle| {
                    client::serve_connection(handle, &deps)
                }))
            }
        }
    }

    pub fn submit(&self, handle: ConnectionHandle) -> Result<(), PoolError> {
        match self {
            Dispatcher::Pool(pool) => pool.submit(handle),
            Dispatcher::LeaderFollower(pool) => pool.submit(handle),
        }
    }

    pub fn shutdown(&self) -> Result<(), PoolError> {
        match self {
            Dispatcher::Pool(pool) => pool.shutdown(),
            Dispatcher::LeaderFollower(pool) => pool.shutdown(),
        }
    }
}

/// Owns the listener, the control pipe, the report pipeline, the
/// dispatch pool, and the session registry, with an explicit
/// bind / run / shutdown lifecycle.
pub struct ServerContext {
    listener: TcpListener,
    local_addr: SocketAddr,
    pipe_read: RawFd,
    pipe_write: RawFd,
    pipeline: Arc<Pipeline>,
    report_pool: Option<Arc<LeaderFollowerPool<ReportJob>>>,
    dispatcher: Arc<Dispatcher>,
    registry: SessionRegistry,
    cancel: Arc<AtomicBool>,
    mux: Multiplexer,
}

impl ServerContext {
    /// Binds the listener and starts the pipeline and dispatch pool.
    /// The multiplexer loop does not run until [`ServerContext::run`].
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.addr)?;
        let local_addr = listener.local_addr()?;
        let (pipe_read, pipe_write) = fdio::pipe()?;

        let registry = SessionRegistry::new();
        let pipeline = Arc::new(Pipeline::start_report(config.pipeline_mode));
        let report_pool = config
            .report_pool_size
            .map(|size| Arc::new(LeaderFollowerPool::start_report(size)));
        let deps = Arc::new(ServeDeps {
            registry: registry.clone(),
            pipeline: Arc::clone(&pipeline),
            report_pool: report_pool.clone(),
            read_buffer_size: config.read_buffer_size,
        });
        let dispatcher = Arc::new(Dispatcher::start(
            config.dispatch_mode,
            config.worker_pool_size,
            deps,
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let mux = Multiplexer::new(
            listener.as_raw_fd(),
            pipe_read,
            pipe_write,
            registry.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&cancel),
            config.poll_timeout,
        );

        info!(addr = %local_addr, workers = config.worker_pool_size,
              "server context bound");
        Ok(Self {
            listener,
            local_addr,
            pipe_read,
            pipe_write,
            pipeline,
            report_pool,
            dispatcher,
            registry,
            cancel,
            mux,
        })
    }

    /// Address the listener actually bound to; with port 0 in the
    /// config this is how callers learn the ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag observed by the multiplexer once per poll timeout; setting
    /// it makes [`ServerContext::run`] return.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Drives the multiplexer loop on the calling thread until
    /// cancellation or a fatal readiness failure.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.mux.run()
    }

    /// Stops the dispatch pool and pipeline and releases the control
    /// pipe. Call after `run` has returned.
    pub fn shutdown(self) -> Result<(), ServerError> {
        self.cancel.store(true, Ordering::SeqCst);
        self.dispatcher.shutdown()?;
        self.pipeline.shutdown();
        if let Some(pool) = &self.report_pool {
            pool.shutdown()?;
        }
        fdio::close(self.pipe_read);
        fdio::close(self.pipe_write);
        drop(self.listener);
        info!("server context shut down");
        Ok(())
    }

    /// Number of parked sessions; diagnostic only.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}
