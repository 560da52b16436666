//! The control-channel handback record.
//!
//! Workers return a processed connection to the multiplexer by writing
//! one fixed-size record into the self-pipe. The pipe is a byte
//! stream, so records for a given descriptor are totally ordered: the
//! multiplexer can never observe a re-registration ahead of the
//! invalidation that preceded it.
//!
//! The record carries no state. Session state travels through the
//! shared [`SessionRegistry`](super::conn::SessionRegistry); the token
//! only distinguishes "re-register, state is parked" from the
//! invalidate sentinel.

use std::io;
use std::os::unix::io::RawFd;

use crate::fdio;

/// Token value denoting "this connection is closed, destroy instead of
/// re-register".
pub const INVALID_TOKEN: u64 = u64::MAX;

/// Token value for an ordinary re-registration.
pub const REGISTER_TOKEN: u64 = 0;

/// Size of the encoded record on the pipe.
pub const RECORD_SIZE: usize = 16;

/// One handback record: `{fd, ctl_fd, token}`, 16 bytes little-endian,
/// written and read whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandbackRecord {
    pub fd: RawFd,
    pub ctl_fd: RawFd,
    pub token: u64,
}

impl HandbackRecord {
    /// Record re-registering `fd`; its state must already be parked in
    /// the session registry.
    pub fn register(fd: RawFd, ctl_fd: RawFd) -> Self {
        Self {
            fd,
            ctl_fd,
            token: REGISTER_TOKEN,
        }
    }

    /// Record denoting a closed connection.
    pub fn invalidate(fd: RawFd, ctl_fd: RawFd) -> Self {
        Self {
            fd,
            ctl_fd,
            token: INVALID_TOKEN,
        }
    }

    pub fn is_invalidate(&self) -> bool {
        self.token == INVALID_TOKEN
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.fd.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ctl_fd.to_le_bytes());
        buf[8..16].copy_from_slice(&self.token.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        Self {
            fd: i32::from_le_bytes(buf[0..4].try_into().expect("record layout")),
            ctl_fd: i32::from_le_bytes(buf[4..8].try_into().expect("record layout")),
            token: u64::from_le_bytes(buf[8..16].try_into().expect("record layout")),
        }
    }
}

/// Writes one whole record into the control pipe.
pub fn write_record(pipe_write: RawFd, record: &HandbackRecord) -> io::Result<()> {
    fdio::write_all(pipe_write, &record.encode())
}

/// Reads exactly one record from the control pipe. Pipe writes at or
/// below `PIPE_BUF` are atomic, so a record never interleaves; a short
/// read can still happen across the syscall boundary and is completed
/// here.
pub fn read_record(pipe_read: RawFd) -> io::Result<HandbackRecord> {
    let mut buf = [0u8; RECORD_SIZE];
    let mut filled = 0;
    while filled < RECORD_SIZE {
        let n = fdio::read_some(pipe_read, &mut buf[filled..])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control pipe closed mid-record",
            ));
        }
        filled += n;
    }
    Ok(HandbackRecord::decode(&buf))
}
