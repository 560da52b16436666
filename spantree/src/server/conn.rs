//! Connection ownership types.
//!
//! A connection's descriptor and session state move together between
//! the multiplexer and whichever worker has the connection checked
//! out. [`ConnFd`] is deliberately neither `Clone` nor `Copy`: putting
//! it in a [`ClientJob`] transfers it, so the type system rules out
//! two threads touching one socket at the same time.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use spantree_graph::Graph;

use crate::fdio;

/// Move-only handle to a connected socket descriptor.
///
/// Closing is explicit rather than `Drop`-driven: in the checkout
/// protocol the same descriptor value crosses thread boundaries inside
/// handback records, and an implicit close on either side would race
/// the other's use of it.
#[derive(Debug)]
pub struct ConnFd(RawFd);

impl ConnFd {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        fdio::read_some(self.0, buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        fdio::write_all(self.0, buf)
    }

    /// Consumes the handle and closes the descriptor.
    pub fn close(self) {
        fdio::close(self.0);
    }
}

/// Per-connection state: the graph under construction, if any.
/// Destruction is automatic when the owning scope ends.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Empty,
    Active(Graph),
}

/// A connection checked out of the multiplexer: descriptor, the write
/// end of the control pipe for the handback, and the session state the
/// worker now exclusively owns.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub conn: ConnFd,
    pub ctl_write: RawFd,
    pub state: SessionState,
}

/// Unit of work consumed by the client worker pool. The shutdown
/// sentinel terminates exactly one worker.
#[derive(Debug)]
pub enum ClientJob {
    Serve(ConnectionHandle),
    Shutdown,
}

/// Shared fd-to-state registry.
///
/// Mutated by the multiplexer thread when it checks a descriptor out
/// or drops a closed connection, plus lock-protected inserts from
/// workers on the handback path. A worker parks the state here before
/// writing its handback record, so by the time the multiplexer reads
/// the record the state is already in place.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<RawFd, SessionState>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `state` for a descriptor about to be handed back.
    pub fn park(&self, fd: RawFd, state: SessionState) {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .insert(fd, state);
    }

    /// Takes the state for a descriptor being checked out (or being
    /// dropped). `Empty` when the connection had no state yet.
    pub fn take(&self, fd: RawFd) -> SessionState {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .remove(&fd)
            .unwrap_or(SessionState::Empty)
    }

    /// Removes any entry for a closed descriptor.
    pub fn remove(&self, fd: RawFd) {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .remove(&fd);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
