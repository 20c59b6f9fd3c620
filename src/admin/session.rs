//! Server-side admin session (spec §4.6): one accepted SCTP association,
//! authenticated once on stream 0, then dispatching BYE/GET/SET on whatever
//! stream each request arrives on. The original source only ever implements
//! the client half of this protocol (`sendAuthenticationRequest`,
//! `sendGetRequest`, …) — the server side below is built from the wire
//! layout in spec §6, there being no original server logic to adapt.
//!
//! SCTP preserves message boundaries the way UDP does; unlike the HTTP side
//! of this crate there is no byte-stream reassembly to do here; one
//! `recv_with_stream` is one complete request.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

use log::{debug, warn};

use crate::admin::socket::SctpSocket;
use crate::admin::wire::{encode_auth_response, Opcode, ResponseHeader, VERSION_BYTE};
use crate::admin::{decode_request, encode_response, AUTH_STREAM};
use crate::selector::Interest;

const RECV_BUF: usize = 4096;
/// The single protocol version this server speaks (`protocol.h`'s `VERSION 0`).
const SERVER_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Authenticating,
    Ready,
    Closed,
}

pub struct AdminSession {
    socket: SctpSocket,
    state: SessionState,
    pending_writes: VecDeque<(u16, Vec<u8>)>,
}

impl AdminSession {
    pub fn new(socket: SctpSocket) -> Self {
        AdminSession {
            socket,
            state: SessionState::Authenticating,
            pending_writes: VecDeque::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn on_readable(&mut self) {
        let mut buf = [0u8; RECV_BUF];
        loop {
            if self.state == SessionState::Closed {
                return;
            }
            match self.socket.recv_with_stream(&mut buf) {
                Ok((0, _)) => {
                    self.state = SessionState::Closed;
                    return;
                }
                Ok((n, stream)) => self.handle_message(stream, &buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("admin session read error: {}", e);
                    self.state = SessionState::Closed;
                    return;
                }
            }
        }
    }

    pub fn on_writable(&mut self) {
        while let Some((stream, bytes)) = self.pending_writes.pop_front() {
            match self.socket.send_on_stream(stream, &bytes) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending_writes.push_front((stream, bytes));
                    return;
                }
                Err(e) => {
                    warn!("admin session write error: {}", e);
                    self.state = SessionState::Closed;
                    return;
                }
            }
        }
    }

    fn handle_message(&mut self, stream: u16, bytes: &[u8]) {
        if stream == AUTH_STREAM && self.state == SessionState::Authenticating {
            self.handle_auth(bytes);
            return;
        }
        if self.state != SessionState::Ready {
            debug!("admin message on stream {} before authentication, dropping", stream);
            return;
        }
        self.handle_operation(stream, bytes);
    }

    /// Parses `version_byte ‖ username\0 ‖ password\0`. No credential store
    /// is specified anywhere in the source material, so any well-formed
    /// request with the expected version marker is accepted; malformed
    /// requests (missing terminators, wrong marker) are rejected.
    fn handle_auth(&mut self, bytes: &[u8]) {
        let malformed = bytes.is_empty() || bytes[0] != VERSION_BYTE;
        let parsed = if !malformed {
            split_two_nul_terminated(&bytes[1..])
        } else {
            None
        };

        let response = match (malformed, parsed) {
            (true, _) => encode_auth_response(true, false, false, 0),
            (false, None) => encode_auth_response(true, false, false, 0),
            (false, Some(_)) => {
                self.state = SessionState::Ready;
                encode_auth_response(false, false, false, SERVER_VERSION)
            }
        };
        self.queue_write(AUTH_STREAM, vec![response]);
    }

    fn handle_operation(&mut self, stream: u16, bytes: &[u8]) {
        match decode_request(bytes) {
            Ok(req) if req.header.opcode == Opcode::Bye => {
                debug!("admin BYE on stream {}", stream);
                self.state = SessionState::Closed;
            }
            Ok(req) => {
                debug!(
                    "admin {:?} id={} stream={} time_tag={}",
                    req.header.opcode, req.header.id, stream, req.time_tag
                );
                let header = ResponseHeader {
                    general_err: false,
                    opcode_err: false,
                    ttag_err: false,
                    id_err: false,
                };
                self.queue_write(stream, vec![encode_response(header)]);
            }
            Err(e) => {
                warn!("admin request decode error on stream {}: {}", stream, e);
                let header = ResponseHeader {
                    general_err: true,
                    opcode_err: false,
                    ttag_err: false,
                    id_err: false,
                };
                self.queue_write(stream, vec![encode_response(header)]);
            }
        }
    }

    fn queue_write(&mut self, stream: u16, bytes: Vec<u8>) {
        self.pending_writes.push_back((stream, bytes));
    }

    pub fn interest(&self) -> Interest {
        match self.state {
            SessionState::Closed if self.pending_writes.is_empty() => Interest::NONE,
            SessionState::Closed => Interest::WRITE,
            _ if !self.pending_writes.is_empty() => Interest::BOTH,
            _ => Interest::READ,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Closed && self.pending_writes.is_empty()
    }
}

fn split_two_nul_terminated(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let first_nul = bytes.iter().position(|&b| b == 0)?;
    let rest = &bytes[first_nul + 1..];
    let second_nul = rest.iter().position(|&b| b == 0)?;
    Some((&bytes[..first_nul], &rest[..second_nul]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_username_and_password() {
        let bytes = b"bob\0hunter2\0";
        let (user, pass) = split_two_nul_terminated(bytes).unwrap();
        assert_eq!(user, b"bob");
        assert_eq!(pass, b"hunter2");
    }

    #[test]
    fn rejects_missing_second_terminator() {
        assert!(split_two_nul_terminated(b"bob\0hunter2").is_none());
    }
}
