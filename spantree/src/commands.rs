//! Text command dispatch for one checked-out connection.
//!
//! The worker hands in the connection's session state by value and
//! gets the (possibly replaced) state back: no command handler ever
//! shares a graph across threads. Report commands block the calling
//! worker on the pipeline latch before replying.

use tracing::{debug, warn};

use spantree_graph::{Graph, MstAlgorithm};

use crate::pipeline::report_stages;
use crate::pool::client::ServeDeps;
use crate::server::conn::{ConnFd, SessionState};

pub const GREETING: &str = "enter one of the following commands:\n\
            Newgraph <vertices>,<edges>\n\
                User should enter <edges> pairs of directed edges\n\
            Newedge <from>,<to>,<weight>\n\
            Removeedge <from>,<to>\n\
            Print\n\
            Prim\n\
            Kruskal\n\n\
enter command:\n";

const MISSING_VERT_EDGE: &str = "Must specify vertices and edges\n";
const PRINT_EDGES_MESSAGE: &str =
    "Enter the directed edges as triplets of vertices <from>,<to>,<weight>:\n";
const MISSING_GRAPH: &str = "Graph does not exist, please create a graph\n";
const INVALID_NEW_EDGE: &str = "Must specify <from>,<to>,<weight> of the new edge\n";
const INVALID_EDGE: &str = "Must specify both endpoints of the edge to remove\n";
const ENTER_COMMAND: &str = "Enter command:\n";
const SEPARATOR: &str = "*****************************************************\n";

/// Runs the first command line of `input` against the session state
/// and returns the new state. TCP gives no line framing, so `input`
/// may carry more than one line; `Newgraph` consumes the surplus as
/// its edge triplets and every other command ignores it. Every reply
/// ends with a prompt line. Write errors to the peer are logged and
/// otherwise ignored; the subsequent read will observe the broken
/// connection.
pub fn dispatch(state: SessionState, input: &str, conn: &ConnFd, deps: &ServeDeps) -> SessionState {
    let (line, leftover) = match input.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (input, ""),
    };
    let line = line.trim_end();
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    let new_state = match command {
        "" => state,
        "Newgraph" => new_graph(rest, leftover, conn, deps),
        "Newedge" => new_edge(state, rest, conn),
        "Removeedge" => remove_edge(state, rest, conn),
        "Print" => print_graph(state, conn),
        "Prim" => report(state, MstAlgorithm::Prim, conn, deps),
        "Kruskal" => report(state, MstAlgorithm::Kruskal, conn, deps),
        other => {
            write_reply(conn, &format!("unrecognized command {other}\n"));
            state
        }
    };
    write_reply(conn, ENTER_COMMAND);
    new_state
}

fn write_reply(conn: &ConnFd, text: &str) {
    if let Err(err) = conn.write_all(text.as_bytes()) {
        warn!(fd = conn.raw(), error = %err, "failed to write reply");
    }
}

/// `Newgraph <v>,<e>`: replaces any existing graph. With `e > 0` the
/// client is prompted for `e` further edge-triplet lines; lines that
/// arrived coalesced behind the command are consumed from `leftover`
/// first, the rest with blocking reads. The descriptor is checked out
/// and not watched by the multiplexer while this runs.
fn new_graph(rest: &str, leftover: &str, conn: &ConnFd, deps: &ServeDeps) -> SessionState {
    let Some((vertices, edges)) = parse_pair::<usize>(rest) else {
        write_reply(conn, MISSING_VERT_EDGE);
        return SessionState::Empty;
    };
    let mut graph = Graph::new(vertices);
    if edges > 0 {
        write_reply(conn, PRINT_EDGES_MESSAGE);
        let mut lines = LineReader::new(conn, deps.read_buffer_size, leftover);
        for _ in 0..edges {
            let Some(line) = lines.next_line() else {
                write_reply(conn, INVALID_NEW_EDGE);
                return SessionState::Empty;
            };
            let Some((u, v, w)) = parse_triplet(&line) else {
                write_reply(conn, INVALID_NEW_EDGE);
                return SessionState::Empty;
            };
            if let Err(err) = graph.add_edge(u, v, w) {
                write_reply(conn, &format!("{err}\n"));
                return SessionState::Empty;
            }
        }
    }
    debug!(fd = conn.raw(), vertices, edges, "created new graph");
    SessionState::Active(graph)
}

fn new_edge(state: SessionState, rest: &str, conn: &ConnFd) -> SessionState {
    let mut graph = match state {
        SessionState::Active(graph) => graph,
        SessionState::Empty => {
            write_reply(conn, MISSING_GRAPH);
            return SessionState::Empty;
        }
    };
    match parse_triplet(rest) {
        Some((u, v, w)) => {
            if let Err(err) = graph.add_edge(u, v, w) {
                write_reply(conn, &format!("{err}\n"));
            }
        }
        None => write_reply(conn, INVALID_NEW_EDGE),
    }
    SessionState::Active(graph)
}

fn remove_edge(state: SessionState, rest: &str, conn: &ConnFd) -> SessionState {
    let mut graph = match state {
        SessionState::Active(graph) => graph,
        SessionState::Empty => {
            write_reply(conn, MISSING_GRAPH);
            return SessionState::Empty;
        }
    };
    match parse_pair::<usize>(rest) {
        Some((u, v)) => {
            graph.remove_edge(u, v);
        }
        None => write_reply(conn, INVALID_EDGE),
    }
    SessionState::Active(graph)
}

fn print_graph(state: SessionState, conn: &ConnFd) -> SessionState {
    match &state {
        SessionState::Active(graph) => write_reply(conn, &graph.render()),
        SessionState::Empty => write_reply(conn, MISSING_GRAPH),
    }
    state
}

/// `Prim` / `Kruskal`: computes the MST, writes its edge listing, then
/// fans the report through the staged pipeline and blocks on the
/// latch so the report lines land before the prompt. When a grouped
/// report pool is configured, the same lines run a second time as a
/// leader-follower task group.
fn report(
    state: SessionState,
    algorithm: MstAlgorithm,
    conn: &ConnFd,
    deps: &ServeDeps,
) -> SessionState {
    let SessionState::Active(graph) = &state else {
        write_reply(conn, MISSING_GRAPH);
        return state;
    };
    let tree = algorithm.compute(graph);
    write_reply(conn, &tree.render());
    write_reply(conn, SEPARATOR);
    write_reply(
        conn,
        &format!("Running report pipeline for {}\n", algorithm.name()),
    );
    let group_tree = deps.report_pool.as_ref().map(|_| tree.clone());
    match deps.pipeline.submit(tree, conn.raw()) {
        Ok(latch) => latch.wait(),
        Err(err) => {
            warn!(fd = conn.raw(), error = %err, "report pipeline unavailable");
            write_reply(conn, "report pipeline unavailable\n");
        }
    }
    write_reply(conn, SEPARATOR);

    if let (Some(pool), Some(tree)) = (&deps.report_pool, group_tree) {
        write_reply(
            conn,
            &format!(
                "Running Leader/Follower thread pool for {}\n",
                algorithm.name()
            ),
        );
        match pool.submit_report_group(&report_stages(), tree, conn.raw()) {
            Ok(latch) => latch.wait(),
            Err(err) => {
                warn!(fd = conn.raw(), error = %err, "grouped report pool unavailable");
                write_reply(conn, "grouped report pool unavailable\n");
            }
        }
        write_reply(conn, SEPARATOR);
    }
    state
}

fn parse_pair<T: std::str::FromStr>(rest: &str) -> Option<(T, T)> {
    let mut fields = rest.split(',').map(str::trim);
    let a = fields.next()?.parse().ok()?;
    let b = fields.next()?.parse().ok()?;
    Some((a, b))
}

fn parse_triplet(rest: &str) -> Option<(usize, usize, f64)> {
    let mut fields = rest.split(',').map(str::trim);
    let u = fields.next()?.parse().ok()?;
    let v = fields.next()?.parse().ok()?;
    let w = fields.next()?.parse().ok()?;
    Some((u, v, w))
}

/// Newline framing over blocking reads. A single read may deliver
/// several coalesced lines or a fragment of one; surplus bytes stay
/// pending for the next call instead of being misparsed as field
/// separators.
struct LineReader<'a> {
    conn: &'a ConnFd,
    cap: usize,
    pending: Vec<u8>,
}

impl<'a> LineReader<'a> {
    fn new(conn: &'a ConnFd, cap: usize, seed: &str) -> Self {
        Self {
            conn,
            cap,
            pending: seed.as_bytes().to_vec(),
        }
    }

    /// Returns the next line, trailing whitespace stripped. `None` on
    /// peer close or read error with no buffered line left. A final
    /// unterminated fragment before close counts as a line.
    fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let tail = self.pending.split_off(pos + 1);
                let line = std::mem::replace(&mut self.pending, tail);
                return Some(String::from_utf8_lossy(&line).trim_end().to_string());
            }
            let mut buf = vec![0u8; self.cap];
            match self.conn.read(&mut buf) {
                Ok(0) | Err(_) => {
                    if self.pending.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut self.pending);
                    return Some(String::from_utf8_lossy(&line).trim_end().to_string());
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
            }
        }
    }
}
