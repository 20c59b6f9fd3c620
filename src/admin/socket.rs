//! Raw `IPPROTO_SCTP` transport for the admin protocol (spec §4.6/§6). No
//! crate in the dependency pack speaks SCTP, so this talks to the kernel
//! directly via `libc`, the way the original C client/server does —
//! `socket`/`bind`/`listen`/`accept`/`connect` plus `sendmsg`/`recvmsg` with
//! an `SCTP_SNDRCV` ancillary message to set and read the stream number.
//!
//! `sctp_sndrcvinfo` is not exposed by the `libc` crate; its layout here
//! mirrors Linux's `<netinet/sctp.h>` for the fields this module uses
//! (`sinfo_stream` and the padding ahead of it).

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use libc::{
    c_void, cmsghdr, iovec, msghdr, sockaddr_in, socklen_t, AF_INET, IPPROTO_SCTP, SOCK_STREAM,
};

const SOL_SCTP: i32 = IPPROTO_SCTP;
const SCTP_SNDRCV: i32 = 1;
const SCTP_INITMSG: i32 = 2;
/// Mirrors `prepareSCTPSocket`'s `MAX_ATTEMPTS` in
/// `examples/original_source/adminProtocol/protocol.c`.
const MAX_INIT_ATTEMPTS: u16 = 4;

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpInitMsg {
    sinit_num_ostreams: u16,
    sinit_max_instreams: u16,
    sinit_max_attempts: u16,
    sinit_max_init_timeo: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpSndRcvInfo {
    sinfo_stream: u16,
    sinfo_ssn: u16,
    sinfo_flags: u16,
    _pad: u16,
    sinfo_ppid: u32,
    sinfo_context: u32,
    sinfo_timetolive: u32,
    sinfo_tsn: u32,
    sinfo_cumtsn: u32,
    sinfo_assoc_id: i32,
}

pub struct SctpSocket {
    fd: RawFd,
}

impl SctpSocket {
    fn raw(fd: RawFd) -> Self {
        SctpSocket { fd }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn listen(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        Self::listen_with_streams(addr, backlog, 1)
    }

    /// Binds and listens, negotiating `stream_quantity` inbound/outbound
    /// SCTP streams via `SCTP_INITMSG`, mirroring `prepareSCTPSocket` in
    /// `examples/original_source/adminProtocol/protocol.c`.
    pub fn listen_with_streams(addr: SocketAddr, backlog: i32, stream_quantity: u16) -> io::Result<Self> {
        let sock = Self::new_socket()?;
        sock.set_init_streams(stream_quantity)?;
        let (sa, len) = to_sockaddr_in(addr);
        let ret = unsafe {
            libc::bind(
                sock.fd,
                &sa as *const sockaddr_in as *const libc::sockaddr,
                len,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        let ret = unsafe { libc::listen(sock.fd, backlog) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }

    pub fn accept(&self) -> io::Result<(Self, SocketAddr)> {
        let mut sa: sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
        let fd = unsafe {
            libc::accept(
                self.fd,
                &mut sa as *mut sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((Self::raw(fd), from_sockaddr_in(&sa)))
    }

    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        Self::connect_with_streams(addr, 1)
    }

    pub fn connect_with_streams(addr: SocketAddr, stream_quantity: u16) -> io::Result<Self> {
        let sock = Self::new_socket()?;
        sock.set_init_streams(stream_quantity)?;
        let (sa, len) = to_sockaddr_in(addr);
        let ret = unsafe {
            libc::connect(
                sock.fd,
                &sa as *const sockaddr_in as *const libc::sockaddr,
                len,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }

    fn new_socket() -> io::Result<Self> {
        let fd = unsafe { libc::socket(AF_INET, SOCK_STREAM, IPPROTO_SCTP) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::raw(fd))
    }

    fn set_init_streams(&self, stream_quantity: u16) -> io::Result<()> {
        let init = SctpInitMsg {
            sinit_num_ostreams: stream_quantity,
            sinit_max_instreams: stream_quantity,
            sinit_max_attempts: MAX_INIT_ATTEMPTS,
            sinit_max_init_timeo: 0,
        };
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_SCTP,
                SCTP_INITMSG,
                &init as *const SctpInitMsg as *const c_void,
                mem::size_of::<SctpInitMsg>() as socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        let ret = unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Sends `buf` on the given SCTP stream via an `SCTP_SNDRCV` ancillary
    /// message.
    pub fn send_on_stream(&self, stream: u16, buf: &[u8]) -> io::Result<usize> {
        let mut info: SctpSndRcvInfo = unsafe { mem::zeroed() };
        info.sinfo_stream = stream;

        let mut cmsg_buf = [0u8; 64];
        let cmsg_len = unsafe { build_sctp_cmsg(&mut cmsg_buf, &info) };

        let mut iov = iovec {
            iov_base: buf.as_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut msg: msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cmsg_len as _;

        let ret = unsafe { libc::sendmsg(self.fd, &msg, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    /// Receives into `buf`, returning the number of bytes read and the
    /// stream number it arrived on (0 if no `SCTP_SNDRCV` info was
    /// attached, which the kernel omits once events are disabled).
    pub fn recv_with_stream(&self, buf: &mut [u8]) -> io::Result<(usize, u16)> {
        let mut cmsg_buf = [0u8; 64];
        let mut iov = iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut msg: msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cmsg_buf.len() as _;

        let ret = unsafe { libc::recvmsg(self.fd, &mut msg, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        let stream = unsafe { read_sctp_stream_from_cmsg(&msg) }.unwrap_or(0);
        Ok((ret as usize, stream))
    }
}

impl Drop for SctpSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

unsafe fn build_sctp_cmsg(buf: &mut [u8], info: &SctpSndRcvInfo) -> usize {
    let cmsg_len = mem::size_of::<cmsghdr>() + mem::size_of::<SctpSndRcvInfo>();
    let header = buf.as_mut_ptr() as *mut cmsghdr;
    (*header).cmsg_len = cmsg_len as _;
    (*header).cmsg_level = SOL_SCTP;
    (*header).cmsg_type = SCTP_SNDRCV;
    let data_ptr = header.add(1) as *mut SctpSndRcvInfo;
    std::ptr::write_unaligned(data_ptr, *info);
    cmsg_len
}

unsafe fn read_sctp_stream_from_cmsg(msg: &msghdr) -> Option<u16> {
    if (msg.msg_controllen as usize) < mem::size_of::<cmsghdr>() {
        return None;
    }
    let header = msg.msg_control as *const cmsghdr;
    if (*header).cmsg_level == SOL_SCTP && (*header).cmsg_type == SCTP_SNDRCV {
        let data_ptr = (header as *const u8).add(mem::size_of::<cmsghdr>()) as *const SctpSndRcvInfo;
        let info = std::ptr::read_unaligned(data_ptr);
        return Some(info.sinfo_stream);
    }
    None
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
        SocketAddr::V6(_) => panic!("admin protocol transport is IPv4-only"),
    }
}

fn from_sockaddr_in(sa: &sockaddr_in) -> SocketAddr {
    let ip = std::net::Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes());
    SocketAddr::new(ip.into(), u16::from_be(sa.sin_port))
}
