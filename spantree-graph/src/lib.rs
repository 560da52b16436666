//! Compute engine for the spantree server.
//!
//! Pure, synchronous graph storage and minimum-spanning-tree
//! computation. Nothing in this crate touches sockets or threads; the
//! server crate calls in with an owned [`Graph`] and gets back a
//! [`SpanningTree`] it can hand to its reporting stages.

pub mod graph;
pub mod mst;
pub mod union_find;

pub use graph::{Edge, Graph, GraphError};
pub use mst::{MstAlgorithm, SpanningTree};
pub use union_find::UnionFind;
