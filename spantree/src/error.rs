use std::io;

use thiserror::Error;

/// Errors related to worker pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is shutting down")]
    ShuttingDown,
    #[error("work queue is closed")]
    QueueClosed,
    #[error("worker thread panicked during join")]
    JoinFailed,
}

/// Errors related to the staged pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline is shutting down")]
    ShuttingDown,
    #[error("stage queue is closed")]
    StageClosed,
}

/// Errors related to the server context and multiplexer loop.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("readiness poll failed: {0}")]
    PollFailed(io::Error),
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("internal server error: {0}")]
    Other(#[from] anyhow::Error),
}
