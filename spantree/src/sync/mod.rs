pub mod latch;

pub use latch::CompletionLatch;
