use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;

use crate::graph::{Edge, Graph};
use crate::union_find::UnionFind;

/// Minimum-spanning-tree algorithm selection.
///
/// An enum with a `compute` match, not a strategy hierarchy: the two
/// algorithms share nothing but their output type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MstAlgorithm {
    Prim,
    Kruskal,
}

impl MstAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            MstAlgorithm::Prim => "Prim",
            MstAlgorithm::Kruskal => "Kruskal",
        }
    }

    /// Computes a minimum spanning tree (a spanning forest when the
    /// graph is disconnected).
    pub fn compute(&self, graph: &Graph) -> SpanningTree {
        match self {
            MstAlgorithm::Prim => prim(graph),
            MstAlgorithm::Kruskal => kruskal(graph),
        }
    }
}

/// Frontier entry for Prim's algorithm, ordered by weight then vertex
/// so the heap pop is deterministic for equal weights.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    weight: f64,
    to: usize,
    from: Option<usize>,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then(self.to.cmp(&other.to))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn prim(graph: &Graph) -> SpanningTree {
    let n = graph.vertices();
    let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for edge in graph.edges() {
        adj[edge.u].push((edge.v, edge.weight));
        adj[edge.v].push((edge.u, edge.weight));
    }

    let mut tree = SpanningTree::new(n);
    let mut selected = vec![false; n];
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

    // Start each component from its lowest-numbered unselected vertex
    // so disconnected graphs yield a spanning forest rather than an
    // early exit.
    for start in 0..n {
        if selected[start] {
            continue;
        }
        heap.push(Reverse(Candidate {
            weight: 0.0,
            to: start,
            from: None,
        }));
        while let Some(Reverse(cand)) = heap.pop() {
            if selected[cand.to] {
                continue;
            }
            selected[cand.to] = true;
            if let Some(from) = cand.from {
                tree.add_edge(Edge::new(from, cand.to, cand.weight));
            }
            for &(next, weight) in &adj[cand.to] {
                if !selected[next] {
                    heap.push(Reverse(Candidate {
                        weight,
                        to: next,
                        from: Some(cand.to),
                    }));
                }
            }
        }
    }
    tree
}

fn kruskal(graph: &Graph) -> SpanningTree {
    let mut edges: Vec<Edge> = graph.edges().to_vec();
    edges.sort_by(|a, b| a.weight.total_cmp(&b.weight));

    let mut uf = UnionFind::new(graph.vertices());
    let mut tree = SpanningTree::new(graph.vertices());
    for edge in edges {
        if uf.unite(edge.u, edge.v) {
            tree.add_edge(edge);
        }
    }
    tree
}

/// The result of an MST computation, exposing the report metrics the
/// server's pipeline stages query.
///
/// All metric methods are pure; `longest_distance` and
/// `average_distance` are path distances within the tree, taken over
/// every pair of vertices the tree connects.
#[derive(Debug, Clone)]
pub struct SpanningTree {
    vertices: usize,
    edges: Vec<Edge>,
    total_weight: f64,
}

impl SpanningTree {
    pub fn new(vertices: usize) -> Self {
        Self {
            vertices,
            edges: Vec::new(),
            total_weight: 0.0,
        }
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.total_weight += edge.weight;
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Maximum path distance between any two vertices connected by the
    /// tree. 0.0 for an empty tree.
    pub fn longest_distance(&self) -> f64 {
        self.pair_distances_fold(f64::MIN, f64::max)
            .unwrap_or(0.0)
    }

    /// Mean path distance over all connected unordered vertex pairs.
    /// 0.0 when the tree connects fewer than two vertices.
    pub fn average_distance(&self) -> f64 {
        let mut sum = 0.0;
        let mut pairs = 0usize;
        self.for_each_pair_distance(|d| {
            sum += d;
            pairs += 1;
        });
        if pairs == 0 { 0.0 } else { sum / pairs as f64 }
    }

    /// Minimum weight among the tree's edges. 0.0 for an empty tree.
    pub fn shortest_distance(&self) -> f64 {
        self.edges
            .iter()
            .map(|e| e.weight)
            .fold(None, |acc: Option<f64>, w| {
                Some(acc.map_or(w, |a| a.min(w)))
            })
            .unwrap_or(0.0)
    }

    /// MST edge listing plus total weight, written to the client ahead
    /// of the report lines.
    pub fn render(&self) -> String {
        let mut out = String::from("MST Edges:\n");
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "Edge ({}, {}) -> Weight: {}",
                edge.u, edge.v, edge.weight
            );
        }
        let _ = writeln!(out, "Total MST Weight: {}", self.total_weight);
        out
    }

    fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.vertices];
        for edge in &self.edges {
            adj[edge.u].push((edge.v, edge.weight));
            adj[edge.v].push((edge.u, edge.weight));
        }
        adj
    }

    fn pair_distances_fold(
        &self,
        init: f64,
        f: fn(f64, f64) -> f64,
    ) -> Option<f64> {
        let mut acc = None;
        self.for_each_pair_distance(|d| {
            acc = Some(f(acc.unwrap_or(init), d));
        });
        acc
    }

    /// Visits the path distance of every connected unordered vertex
    /// pair exactly once. The tree has no cycles, so an iterative DFS
    /// from each source gives each distance directly.
    fn for_each_pair_distance<F: FnMut(f64)>(&self, mut visit: F) {
        let adj = self.adjacency();
        let mut stack: Vec<(usize, usize, f64)> = Vec::new();
        for src in 0..self.vertices {
            stack.clear();
            stack.push((src, usize::MAX, 0.0));
            while let Some((vertex, parent, dist)) = stack.pop() {
                // Count each unordered pair once.
                if vertex > src {
                    visit(dist);
                }
                for &(next, weight) in &adj[vertex] {
                    if next != parent {
                        stack.push((next, vertex, dist + weight));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Graph {
        // Connected 5-vertex graph with a unique MST of weight 27.
        let mut g = Graph::new(5);
        for (u, v, w) in [
            (0, 1, 10.0),
            (0, 2, 5.0),
            (1, 2, 7.0),
            (1, 3, 8.0),
            (2, 3, 6.0),
            (3, 4, 9.0),
        ] {
            g.add_edge(u, v, w).unwrap();
        }
        g
    }

    #[test]
    fn prim_and_kruskal_agree_on_total_weight() {
        let g = fixture();
        let prim = MstAlgorithm::Prim.compute(&g);
        let kruskal = MstAlgorithm::Kruskal.compute(&g);
        assert_eq!(prim.edges().len(), 4);
        assert_eq!(kruskal.edges().len(), 4);
        assert!((prim.total_weight() - 27.0).abs() < 1e-9);
        assert!((kruskal.total_weight() - prim.total_weight()).abs() < 1e-9);
    }

    #[test]
    fn disconnected_graph_yields_spanning_forest() {
        let mut g = Graph::new(4);
        g.add_edge(0, 1, 1.0).unwrap();
        g.add_edge(2, 3, 2.0).unwrap();
        let tree = MstAlgorithm::Prim.compute(&g);
        assert_eq!(tree.edges().len(), 2);
        assert!((tree.total_weight() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn distance_metrics_on_a_path_tree() {
        // Tree: 0 -1- 1 -2- 2, path distances 1, 2, 3.
        let mut g = Graph::new(3);
        g.add_edge(0, 1, 1.0).unwrap();
        g.add_edge(1, 2, 2.0).unwrap();
        let tree = MstAlgorithm::Kruskal.compute(&g);
        assert!((tree.longest_distance() - 3.0).abs() < 1e-9);
        assert!((tree.average_distance() - 2.0).abs() < 1e-9);
        assert!((tree.shortest_distance() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_tree_metrics_are_zero() {
        let tree = SpanningTree::new(0);
        assert_eq!(tree.total_weight(), 0.0);
        assert_eq!(tree.longest_distance(), 0.0);
        assert_eq!(tree.average_distance(), 0.0);
        assert_eq!(tree.shortest_distance(), 0.0);
    }
}
