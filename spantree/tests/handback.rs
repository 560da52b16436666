use std::io::{Read, Write};
use std::os::unix::io::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use spantree::PipelineMode;
use spantree::fdio;
use spantree::pipeline::Pipeline;
use spantree::pool::{ClientWorkerPool, ServeDeps};
use spantree::pool::client::serve_connection;
use spantree::server::conn::{ConnFd, ConnectionHandle, SessionRegistry, SessionState};
use spantree::server::handback;

struct Fixture {
    deps: ServeDeps,
    pipe_read: i32,
    pipe_write: i32,
}

impl Fixture {
    fn new() -> Self {
        let (pipe_read, pipe_write) = fdio::pipe().unwrap();
        let deps = ServeDeps {
            registry: SessionRegistry::new(),
            pipeline: Arc::new(Pipeline::start_report(PipelineMode::Chained)),
            report_pool: None,
            read_buffer_size: 1024,
        };
        Self {
            deps,
            pipe_read,
            pipe_write,
        }
    }

    fn close(self) {
        self.deps.pipeline.shutdown();
        fdio::close(self.pipe_read);
        fdio::close(self.pipe_write);
    }
}

#[test]
fn serving_a_command_parks_state_before_the_register_record() {
    let fx = Fixture::new();
    let (mut client, server) = UnixStream::pair().unwrap();
    let fd = server.into_raw_fd();

    client.write_all(b"Newgraph 2,0\n").unwrap();
    serve_connection(
        ConnectionHandle {
            conn: ConnFd::new(fd),
            ctl_write: fx.pipe_write,
            state: SessionState::Empty,
        },
        &fx.deps,
    );

    // The record arrives after the state was parked, so resolving it
    // against the registry always succeeds.
    let record = handback::read_record(fx.pipe_read).unwrap();
    assert_eq!(record.fd, fd);
    assert!(!record.is_invalidate());
    assert!(matches!(fx.deps.registry.take(fd), SessionState::Active(_)));

    let mut buf = [0u8; 256];
    let n = client.read(&mut buf).unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.contains("Enter command:"));

    fdio::close(fd);
    fx.close();
}

#[test]
fn peer_close_produces_an_invalidation_record() {
    let fx = Fixture::new();
    let (client, server) = UnixStream::pair().unwrap();
    let fd = server.into_raw_fd();
    drop(client);

    serve_connection(
        ConnectionHandle {
            conn: ConnFd::new(fd),
            ctl_write: fx.pipe_write,
            state: SessionState::Empty,
        },
        &fx.deps,
    );

    let record = handback::read_record(fx.pipe_read).unwrap();
    assert_eq!(record.fd, fd);
    assert!(record.is_invalidate());
    assert!(fx.deps.registry.is_empty());

    fx.close();
}

#[test]
fn queued_client_jobs_are_dropped_on_shutdown() {
    let fx = Fixture::new();
    let deps = Arc::new(ServeDeps {
        registry: fx.deps.registry.clone(),
        pipeline: Arc::clone(&fx.deps.pipeline),
        report_pool: None,
        read_buffer_size: fx.deps.read_buffer_size,
    });
    let pool = ClientWorkerPool::start(1, deps);

    // The only worker blocks reading a connection with no data.
    let (first_peer, first) = UnixStream::pair().unwrap();
    let first_fd = first.into_raw_fd();
    pool.submit(ConnectionHandle {
        conn: ConnFd::new(first_fd),
        ctl_write: fx.pipe_write,
        state: SessionState::Empty,
    })
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // Nine more jobs, each with a command already waiting, so any of
    // them that ran would park a session in the registry.
    let mut peers = Vec::new();
    for _ in 0..9 {
        let (mut peer, sock) = UnixStream::pair().unwrap();
        peer.write_all(b"Newgraph 2,0\n").unwrap();
        pool.submit(ConnectionHandle {
            conn: ConnFd::new(sock.into_raw_fd()),
            ctl_write: fx.pipe_write,
            state: SessionState::Empty,
        })
        .unwrap();
        peers.push(peer);
    }

    let stopper = std::thread::spawn(move || pool.shutdown());
    std::thread::sleep(Duration::from_millis(50));
    drop(first_peer);
    stopper.join().unwrap().unwrap();

    // The in-flight job completed with an invalidation; every queued
    // job was dropped without being served.
    let record = handback::read_record(fx.pipe_read).unwrap();
    assert_eq!(record.fd, first_fd);
    assert!(record.is_invalidate());
    assert!(
        fx.deps.registry.is_empty(),
        "a queued job was served after shutdown"
    );

    drop(peers);
    fx.close();
}

#[test]
fn session_state_survives_a_full_checkout_cycle() {
    let fx = Fixture::new();
    let (mut client, server) = UnixStream::pair().unwrap();
    let fd = server.into_raw_fd();

    client.write_all(b"Newgraph 3,0\n").unwrap();
    serve_connection(
        ConnectionHandle {
            conn: ConnFd::new(fd),
            ctl_write: fx.pipe_write,
            state: SessionState::Empty,
        },
        &fx.deps,
    );
    let mut buf = [0u8; 256];
    client.read(&mut buf).unwrap();
    handback::read_record(fx.pipe_read).unwrap();

    // Second checkout: the parked graph must flow back in, so the
    // edge lands in the graph created by the first command.
    let state = fx.deps.registry.take(fd);
    client.write_all(b"Newedge 0,1,2.5\n").unwrap();
    serve_connection(
        ConnectionHandle {
            conn: ConnFd::new(fd),
            ctl_write: fx.pipe_write,
            state,
        },
        &fx.deps,
    );
    handback::read_record(fx.pipe_read).unwrap();

    match fx.deps.registry.take(fd) {
        SessionState::Active(graph) => {
            assert_eq!(graph.edges().len(), 1);
            assert_eq!(graph.edges()[0].weight, 2.5);
        }
        SessionState::Empty => panic!("graph state was lost across the handback"),
    }

    fdio::close(fd);
    fx.close();
}
