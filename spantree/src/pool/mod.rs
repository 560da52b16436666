pub mod client;
pub mod leader_follower;

pub use client::{ClientWorkerPool, ServeDeps};
pub use leader_follower::{LeaderFollowerPool, PoolMetrics, ReportJob};
