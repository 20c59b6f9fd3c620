//! Shared non-blocking read/write wrappers over raw fds (sockets and
//! pipes alike) used by the connection state machine and the transform
//! stage.

use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd::{read, write};

/// `Ok(None)` means "would block", `Ok(Some(0))` means EOF, `Ok(Some(n))`
/// means `n` bytes landed in `buf`.
pub fn nonblocking_read(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match read(fd, buf) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

pub fn nonblocking_write(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    match write(fd, buf) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(Errno::EPIPE) => Ok(Some(0)),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}
