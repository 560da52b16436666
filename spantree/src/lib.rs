//! Multi-threaded TCP spanning-tree report service.
//!
//! A single-threaded `poll(2)` multiplexer owns the listening socket
//! and every idle connection. Ready connections are checked out to a
//! worker pool (plain or leader-follower discipline), which performs
//! the blocking read, runs the text command against the connection's
//! session state, and hands the descriptor back to the multiplexer
//! through a self-pipe. Report commands fan a computed spanning tree
//! through a staged pipeline of active objects, with a completion
//! latch letting the submitting worker block until every stage has
//! written its line.

pub mod commands;
pub mod config;
pub mod error;
pub mod fdio;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod server;
pub mod sync;

pub use config::{DispatchMode, PipelineMode, ServerConfig};
pub use error::{PipelineError, PoolError, ServerError};
pub use server::ServerContext;
pub use sync::latch::CompletionLatch;
