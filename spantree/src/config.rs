use std::net::SocketAddr;
use std::time::Duration;

/// Which worker-dispatch discipline serves checked-out connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Plain pool: every idle worker blocks on the shared queue.
    Pool,
    /// Leader-follower: one elected thread dequeues at a time and
    /// hands leadership off before processing.
    LeaderFollower,
}

/// How a report task visits the pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMode {
    /// Canonical: the task enters the first stage only and each stage
    /// forwards it to the next, so report lines appear in stage order.
    Chained,
    /// Every stage receives the task independently; output order is
    /// unspecified, only latch completion is guaranteed.
    FanOut,
}

/// Configuration for a [`ServerContext`](crate::server::ServerContext).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the listener binds to. Port 0 picks an ephemeral port.
    pub addr: SocketAddr,

    /// Number of threads serving checked-out connections.
    pub worker_pool_size: usize,

    /// Worker-dispatch discipline for connection work.
    pub dispatch_mode: DispatchMode,

    /// Report pipeline composition mode.
    pub pipeline_mode: PipelineMode,

    /// Size of the leader-follower pool that runs a second, grouped
    /// report phase after the pipeline. `None` disables the phase.
    pub report_pool_size: Option<usize>,

    /// Readiness poll timeout; the cancellation flag is observed once
    /// per expiry.
    pub poll_timeout: Duration,

    /// Size of the per-read buffer for client commands.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9034".parse().expect("static addr"),
            worker_pool_size: num_cpus::get().min(4).max(2),
            dispatch_mode: DispatchMode::Pool,
            pipeline_mode: PipelineMode::Chained,
            report_pool_size: None,
            poll_timeout: Duration::from_millis(500),
            read_buffer_size: 1024,
        }
    }
}
