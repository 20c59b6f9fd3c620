//! Plain non-blocking TCP helpers shared by the listener (client side) and
//! origin dialing (spec §4.3 CONNECT). Raw `libc` sockets, consistent with
//! how the admin transport and the transform child's pipes are handled
//! elsewhere in this crate — nothing here is blocking, and nothing needs a
//! full async-runtime socket type for a single-threaded selector loop.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use libc::{sockaddr_in, socklen_t, AF_INET, SOCK_STREAM};

pub fn listen(addr: SocketAddr, backlog: i32) -> io::Result<RawFd> {
    let fd = new_nonblocking_tcp_socket()?;
    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as socklen_t,
        );
    }
    let (sa, len) = to_sockaddr_in(addr);
    if unsafe { libc::bind(fd, &sa as *const sockaddr_in as *const libc::sockaddr, len) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    if unsafe { libc::listen(fd, backlog) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

/// `Ok(None)` means no pending connection (`EAGAIN`/`EWOULDBLOCK`).
pub fn accept(listener_fd: RawFd) -> io::Result<Option<(RawFd, SocketAddr)>> {
    let mut sa: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
    let fd = unsafe {
        libc::accept(
            listener_fd,
            &mut sa as *mut sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    };
    if fd < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    set_nonblocking(fd)?;
    Ok(Some((fd, from_sockaddr_in(&sa))))
}

/// Starts a non-blocking connect. The fd should be registered for write
/// readiness; once writable, call `take_connect_error` to learn whether it
/// actually succeeded.
pub fn connect_nonblocking(addr: SocketAddr) -> io::Result<RawFd> {
    let fd = new_nonblocking_tcp_socket()?;
    let (sa, len) = to_sockaddr_in(addr);
    let ret = unsafe { libc::connect(fd, &sa as *const sockaddr_in as *const libc::sockaddr, len) };
    if ret == 0 {
        return Ok(fd);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS) {
        return Ok(fd);
    }
    unsafe { libc::close(fd) };
    Err(err)
}

/// Reads `SO_ERROR` off a connecting socket once it becomes writable.
/// `Ok(())` means the connection succeeded.
pub fn take_connect_error(fd: RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    if err == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(err))
    }
}

fn new_nonblocking_tcp_socket() -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(AF_INET, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    set_nonblocking(fd)?;
    Ok(fd)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn to_sockaddr_in(addr: SocketAddr) -> (sockaddr_in, socklen_t) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut sa: sockaddr_in = unsafe { mem::zeroed() };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (sa, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(_) => panic!("origin/listener sockets are IPv4-only"),
    }
}

fn from_sockaddr_in(sa: &sockaddr_in) -> SocketAddr {
    let ip = std::net::Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes());
    SocketAddr::new(ip.into(), u16::from_be(sa.sin_port))
}
