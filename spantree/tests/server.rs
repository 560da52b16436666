use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spantree::{DispatchMode, ServerConfig, ServerContext};

struct TestServer {
    addr: SocketAddr,
    cancel: Arc<AtomicBool>,
    mux_thread: JoinHandle<ServerContext>,
}

impl TestServer {
    fn start(dispatch_mode: DispatchMode) -> Self {
        Self::start_with(ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            dispatch_mode,
            poll_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        })
    }

    fn start_with(config: ServerConfig) -> Self {
        spantree::logging::init_test();
        let mut context = ServerContext::bind(config).expect("bind failed");
        let addr = context.local_addr();
        let cancel = context.cancel_handle();
        let mux_thread = thread::spawn(move || {
            context.run().expect("multiplexer loop failed");
            context
        });
        Self {
            addr,
            cancel,
            mux_thread,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream
    }

    fn stop(self) {
        self.cancel.store(true, Ordering::SeqCst);
        let context = self.mux_thread.join().expect("multiplexer thread panicked");
        context.shutdown().expect("shutdown failed");
    }
}

fn read_until(stream: &mut TcpStream, marker: &str) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf).expect("read failed");
        assert!(
            n > 0,
            "connection closed before {marker:?}; got {:?}",
            String::from_utf8_lossy(&out)
        );
        out.extend_from_slice(&buf[..n]);
        if String::from_utf8_lossy(&out).contains(marker) {
            return String::from_utf8_lossy(&out).into_owned();
        }
    }
}

/// Builds the 5-vertex fixture graph over the wire. All six edge
/// lines go out in one write; the server's line framing must split
/// them however the segments arrive.
fn build_fixture_graph(stream: &mut TcpStream) {
    stream.write_all(b"Newgraph 5,6\n").unwrap();
    read_until(stream, "triplets");
    stream
        .write_all(b"0,1,10\n0,2,5\n1,2,7\n1,3,8\n2,3,6\n3,4,9\n")
        .unwrap();
    read_until(stream, "Enter command:\n");
}

fn assert_report(reply: &str, algorithm: &str) {
    assert!(reply.contains("Total MST Weight: 27"), "reply: {reply:?}");
    assert!(reply.contains(&format!("Running report pipeline for {algorithm}")));
    let total = reply.find("TotalWeight: 27").expect("missing total weight");
    let longest = reply
        .find("LongestDistance: 22")
        .expect("missing longest distance");
    let average = reply
        .find("AverageDistance: 12")
        .expect("missing average distance");
    let shortest = reply
        .find("ShortestDistance: 5")
        .expect("missing shortest distance");
    assert!(
        total < longest && longest < average && average < shortest,
        "report lines out of stage order: {reply:?}"
    );
}

#[test]
fn full_session_with_prim_and_kruskal_reports() {
    let server = TestServer::start(DispatchMode::Pool);
    let mut stream = server.connect();

    let greeting = read_until(&mut stream, "enter command:\n");
    assert!(greeting.contains("Newgraph <vertices>,<edges>"));

    build_fixture_graph(&mut stream);

    stream.write_all(b"Prim\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert_report(&reply, "Prim");

    stream.write_all(b"Kruskal\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert_report(&reply, "Kruskal");

    drop(stream);
    server.stop();
}

#[test]
fn coalesced_edge_lines_in_one_segment_are_split() {
    let server = TestServer::start(DispatchMode::Pool);
    let mut stream = server.connect();
    read_until(&mut stream, "enter command:\n");

    stream.write_all(b"Newgraph 3,2\n").unwrap();
    read_until(&mut stream, "triplets");
    stream.write_all(b"0,1,1\n1,2,2\n").unwrap();
    read_until(&mut stream, "Enter command:\n");

    stream.write_all(b"Kruskal\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Total MST Weight: 3"), "reply: {reply:?}");

    drop(stream);
    server.stop();
}

#[test]
fn newgraph_accepts_edges_coalesced_behind_the_command() {
    let server = TestServer::start(DispatchMode::Pool);
    let mut stream = server.connect();
    read_until(&mut stream, "enter command:\n");

    // Command and both triplets in a single segment: the edges must
    // be consumed from the same read, not misparsed as part of the
    // vertex/edge pair.
    stream.write_all(b"Newgraph 3,2\n0,1,1\n1,2,2\n").unwrap();
    read_until(&mut stream, "Enter command:\n");

    stream.write_all(b"Prim\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Total MST Weight: 3"), "reply: {reply:?}");

    drop(stream);
    server.stop();
}

#[test]
fn edge_mutation_changes_the_reported_tree() {
    let server = TestServer::start(DispatchMode::Pool);
    let mut stream = server.connect();
    read_until(&mut stream, "enter command:\n");

    build_fixture_graph(&mut stream);

    // Removing (0,2) forces the MST onto (0,1): weight 27 - 5 + 10.
    stream.write_all(b"Removeedge 0,2\n").unwrap();
    read_until(&mut stream, "Enter command:\n");
    stream.write_all(b"Kruskal\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Total MST Weight: 32"), "reply: {reply:?}");

    // Adding a cheap parallel route restores a lighter tree.
    stream.write_all(b"Newedge 0,2,1\n").unwrap();
    read_until(&mut stream, "Enter command:\n");
    stream.write_all(b"Print\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Edge (0, 2) -> Weight: 1"));

    drop(stream);
    server.stop();
}

#[test]
fn sessions_do_not_share_graph_state() {
    let server = TestServer::start(DispatchMode::Pool);

    let mut first = server.connect();
    read_until(&mut first, "enter command:\n");
    build_fixture_graph(&mut first);

    // A second client has no graph even while the first one does.
    let mut second = server.connect();
    read_until(&mut second, "enter command:\n");
    second.write_all(b"Prim\n").unwrap();
    let reply = read_until(&mut second, "Enter command:\n");
    assert!(reply.contains("Graph does not exist"), "reply: {reply:?}");

    first.write_all(b"Kruskal\n").unwrap();
    let reply = read_until(&mut first, "Enter command:\n");
    assert!(reply.contains("Total MST Weight: 27"), "reply: {reply:?}");

    drop(first);
    drop(second);
    server.stop();
}

#[test]
fn report_before_graph_and_unknown_commands_are_rejected() {
    let server = TestServer::start(DispatchMode::Pool);
    let mut stream = server.connect();
    read_until(&mut stream, "enter command:\n");

    stream.write_all(b"Kruskal\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Graph does not exist"));

    stream.write_all(b"Frobnicate\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("unrecognized command Frobnicate"));

    stream.write_all(b"Newgraph nonsense\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert!(reply.contains("Must specify vertices and edges"));

    drop(stream);
    server.stop();
}

#[test]
fn grouped_report_phase_runs_after_the_pipeline() {
    let server = TestServer::start_with(ServerConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        report_pool_size: Some(2),
        poll_timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    });

    let mut stream = server.connect();
    read_until(&mut stream, "enter command:\n");
    build_fixture_graph(&mut stream);

    stream.write_all(b"Prim\n").unwrap();
    let reply = read_until(&mut stream, "Enter command:\n");
    assert_report(&reply, "Prim");
    assert!(reply.contains("Running Leader/Follower thread pool for Prim"));
    // Pipeline phase plus grouped phase: every metric line twice. The
    // grouped phase has no ordering guarantee, only completeness.
    assert_eq!(reply.matches("TotalWeight: 27").count(), 2, "reply: {reply:?}");
    assert_eq!(reply.matches("ShortestDistance: 5").count(), 2);

    drop(stream);
    server.stop();
}

#[test]
fn leader_follower_dispatch_serves_concurrent_clients() {
    let server = TestServer::start(DispatchMode::LeaderFollower);

    let addr = server.addr;
    let sessions: Vec<JoinHandle<()>> = (0..3)
        .map(|_| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).expect("connect failed");
                stream
                    .set_read_timeout(Some(Duration::from_secs(10)))
                    .unwrap();
                read_until(&mut stream, "enter command:\n");
                build_fixture_graph(&mut stream);
                stream.write_all(b"Prim\n").unwrap();
                let reply = read_until(&mut stream, "Enter command:\n");
                assert_report(&reply, "Prim");
            })
        })
        .collect();
    for session in sessions {
        session.join().expect("client session panicked");
    }

    server.stop();
}
