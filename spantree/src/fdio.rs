//! Thin wrappers over raw-descriptor syscalls shared by the
//! multiplexer, the worker pools, and the pipeline stages. All loops
//! retry on `EINTR`; partial writes are completed before returning.

use std::io;
use std::os::unix::io::RawFd;

/// Performs one blocking read, retrying on `EINTR`. Returns the byte
/// count; zero means the peer closed.
pub fn read_some(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Writes the whole buffer, retrying on `EINTR` and short writes.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            buf = &buf[n as usize..];
            continue;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

/// Closes a descriptor, ignoring errors: close failures are not
/// actionable at any call site in this crate.
pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Creates the control self-pipe: (read end, write end).
pub fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}
