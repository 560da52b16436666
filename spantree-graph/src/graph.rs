use std::fmt::Write as _;

use thiserror::Error;

/// Errors raised by graph mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("vertex {vertex} out of range (graph has {vertices} vertices)")]
    VertexOutOfRange { vertex: usize, vertices: usize },
}

/// A weighted undirected edge between two vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub u: usize,
    pub v: usize,
    pub weight: f64,
}

impl Edge {
    pub fn new(u: usize, v: usize, weight: f64) -> Self {
        Self { u, v, weight }
    }

    /// True when this edge joins `a` and `b` in either orientation.
    pub fn joins(&self, a: usize, b: usize) -> bool {
        (self.u == a && self.v == b) || (self.u == b && self.v == a)
    }
}

/// Edge-list graph built up by client commands.
///
/// The vertex count is fixed at construction; edges are added and
/// removed freely. Parallel edges are allowed, matching the input
/// grammar which places no uniqueness constraint on edge triplets.
#[derive(Debug, Clone)]
pub struct Graph {
    vertices: usize,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new(vertices: usize) -> Self {
        Self {
            vertices,
            edges: Vec::new(),
        }
    }

    pub fn vertices(&self) -> usize {
        self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn add_edge(&mut self, u: usize, v: usize, weight: f64) -> Result<(), GraphError> {
        for vertex in [u, v] {
            if vertex >= self.vertices {
                return Err(GraphError::VertexOutOfRange {
                    vertex,
                    vertices: self.vertices,
                });
            }
        }
        self.edges.push(Edge::new(u, v, weight));
        Ok(())
    }

    /// Removes every edge joining `u` and `v`, in either orientation.
    /// Returns the number of edges removed.
    pub fn remove_edge(&mut self, u: usize, v: usize) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| !e.joins(u, v));
        before - self.edges.len()
    }

    /// Text listing written back for the `Print` command.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "Edge ({}, {}) -> Weight: {}",
                edge.u, edge.v, edge.weight
            );
        }
        out
    }
}
