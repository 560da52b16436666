//! The readiness-based connection multiplexer.
//!
//! A single thread polls the listening socket, the control pipe's read
//! end, and every idle client descriptor. Ready clients are removed
//! from the watch set and checked out to the dispatch pool; workers
//! return them through the control pipe. The poll timeout bounds how
//! long a cancellation request can go unobserved.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::commands::GREETING;
use crate::error::ServerError;
use crate::fdio;
use crate::server::conn::{ConnFd, ConnectionHandle, SessionRegistry};
use crate::server::handback;
use crate::server::Dispatcher;

/// Watch-list slot of the listening socket.
const LISTENER_SLOT: usize = 0;
/// Watch-list slot of the control pipe's read end.
const CONTROL_SLOT: usize = 1;
/// First client slot.
const CLIENT_BASE: usize = 2;

const READY_MASK: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;

fn pollin_entry(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

pub struct Multiplexer {
    listener_fd: RawFd,
    pipe_read: RawFd,
    pipe_write: RawFd,
    pfds: Vec<libc::pollfd>,
    registry: SessionRegistry,
    dispatcher: Arc<Dispatcher>,
    cancel: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl Multiplexer {
    pub fn new(
        listener_fd: RawFd,
        pipe_read: RawFd,
        pipe_write: RawFd,
        registry: SessionRegistry,
        dispatcher: Arc<Dispatcher>,
        cancel: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            listener_fd,
            pipe_read,
            pipe_write,
            pfds: vec![pollin_entry(listener_fd), pollin_entry(pipe_read)],
            registry,
            dispatcher,
            cancel,
            poll_timeout,
        }
    }

    /// Runs the readiness loop on the calling thread until the cancel
    /// flag is observed. A `poll` failure is fatal: the loop cannot
    /// make progress without it.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let timeout_ms = self.poll_timeout.as_millis() as libc::c_int;
        info!("multiplexer loop started");
        while !self.cancel.load(Ordering::SeqCst) {
            let ready = unsafe {
                libc::poll(
                    self.pfds.as_mut_ptr(),
                    self.pfds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "poll failed, terminating loop");
                return Err(ServerError::PollFailed(err));
            }
            if ready == 0 {
                continue;
            }

            if self.pfds[LISTENER_SLOT].revents & libc::POLLIN != 0 {
                self.accept_new();
            }
            if self.pfds[CONTROL_SLOT].revents & libc::POLLIN != 0 {
                self.handle_handback()?;
            }

            // Snapshot ready client fds first: checking one out mutates
            // the watch list by swap-with-last.
            let ready_clients: Vec<RawFd> = self.pfds[CLIENT_BASE..]
                .iter()
                .filter(|p| p.revents & READY_MASK != 0)
                .map(|p| p.fd)
                .collect();
            for fd in ready_clients {
                self.check_out(fd);
            }
        }
        info!("multiplexer loop cancelled");
        self.close_clients();
        Ok(())
    }

    /// Accepts one new connection, registers it with empty state, and
    /// sends the greeting. Accept failure is logged and tolerated: one
    /// bad accept must not take the service down.
    fn accept_new(&mut self) {
        let newfd =
            unsafe { libc::accept(self.listener_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if newfd < 0 {
            warn!(error = %io::Error::last_os_error(), "accept failed");
            return;
        }
        if let Err(err) = fdio::write_all(newfd, GREETING.as_bytes()) {
            warn!(fd = newfd, error = %err, "failed to send greeting, dropping connection");
            fdio::close(newfd);
            return;
        }
        self.add_client(newfd);
        info!(fd = newfd, "accepted new connection");
    }

    /// Reads one handback record. An invalid token denotes a closed
    /// connection; anything else restores the descriptor to the watch
    /// list with the state the worker parked. A broken control pipe is
    /// as fatal as a poll failure.
    fn handle_handback(&mut self) -> Result<(), ServerError> {
        let record = handback::read_record(self.pipe_read).map_err(ServerError::Io)?;
        if record.is_invalidate() {
            debug!(fd = record.fd, "connection invalidated by worker");
            self.registry.remove(record.fd);
        } else {
            debug!(fd = record.fd, "re-registering connection");
            self.add_client(record.fd);
        }
        Ok(())
    }

    /// Removes `fd` from the watch list (O(1) swap-with-last), takes
    /// its state, and hands both to the dispatch pool. The descriptor
    /// is not watched again until the worker hands it back.
    fn check_out(&mut self, fd: RawFd) {
        let Some(pos) = self.pfds[CLIENT_BASE..].iter().position(|p| p.fd == fd) else {
            return;
        };
        self.pfds.swap_remove(CLIENT_BASE + pos);

        let state = self.registry.take(fd);
        let handle = ConnectionHandle {
            conn: ConnFd::new(fd),
            ctl_write: self.pipe_write,
            state,
        };
        debug!(fd, "checking connection out to worker pool");
        if let Err(err) = self.dispatcher.submit(handle) {
            warn!(fd, error = %err, "dispatch pool rejected connection, closing");
            fdio::close(fd);
        }
    }

    fn add_client(&mut self, fd: RawFd) {
        debug_assert!(
            !self.pfds[CLIENT_BASE..].iter().any(|p| p.fd == fd),
            "descriptor {fd} registered twice"
        );
        self.pfds.push(pollin_entry(fd));
    }

    /// Closes every still-watched client and drops its state. Called
    /// on cancellation; in-flight workers still hold their checked-out
    /// descriptors and close them via the normal handback path.
    fn close_clients(&mut self) {
        for entry in self.pfds.drain(CLIENT_BASE..) {
            self.registry.remove(entry.fd);
            fdio::close(entry.fd);
        }
    }

    #[cfg(test)]
    pub(crate) fn watched_clients(&self) -> Vec<RawFd> {
        self.pfds[CLIENT_BASE..].iter().map(|p| p.fd).collect()
    }
}
