//! Per-connection state machine (spec §4.3): `PARSE → RESOLVE → CONNECT →
//! FORWARD_HEAD → TRANSFORM_BODY → DONE`, with `ERROR` reachable from any
//! state. Owns the client fd, the origin fd once dialed, the request head,
//! the four ring buffers that carry bytes between them, and — once the
//! response head has arrived — either a `TransformStage` or the simpler
//! two-endpoint pass-through the spec's predicate table collapses to when
//! no transformer is configured.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::buffer::RingBuf;
use crate::config::Config;
use crate::ioutil::{nonblocking_read, nonblocking_write};
use crate::metrics;
use crate::parser::{ParseOutcome, RequestHead, RequestParser};
use crate::response;
use crate::selector::Interest;
use crate::transform::{TransformChild, TransformStage};

const HEAD_BUF: usize = 8 * 1024;
const BODY_BUF: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Parse,
    Resolve,
    Connect,
    ForwardHead,
    TransformBody,
    Done,
    Error,
}

/// The two-endpoint pass-through the spec's predicate table collapses to
/// when no transformer is configured, or one failed to spawn/exited before
/// producing output (spec §4.4 Fallback rule).
struct PassThrough {
    rechunk: bool,
    origin_eof: bool,
}

enum BodyMode {
    Transform(TransformStage),
    PassThrough(PassThrough),
}

/// What the caller (`server.rs`) should do next after driving an event:
/// which fds to register/unregister and whether a fresh origin dial or DNS
/// lookup is now due.
pub enum Action {
    None,
    NeedResolve { host: String, port: u16 },
    NeedConnect { addr: SocketAddr },
    SpawnTransform { command: String, stderr_path: String },
    Close,
}

pub struct Connection {
    pub state: State,
    client_fd: RawFd,
    origin_fd: Option<RawFd>,
    config: Arc<Config>,

    parser: RequestParser,
    head: Option<RequestHead>,
    /// The raw request-line-plus-headers bytes as the parser consumed them,
    /// captured out of `client_in` one read-callback's worth at a time since
    /// the sub-parsers themselves only track match state, not matched text.
    raw_head: Vec<u8>,

    client_in: RingBuf,
    origin_out: RingBuf,
    origin_in: RingBuf,
    client_out: RingBuf,

    body: Option<BodyMode>,
    response_head_sent: bool,
    client_body_passthrough: bool,
}

impl Connection {
    pub fn new(client_fd: RawFd, config: Arc<Config>) -> Self {
        Connection {
            state: State::Parse,
            client_fd,
            origin_fd: None,
            config,
            parser: RequestParser::new(),
            head: None,
            raw_head: Vec::new(),
            client_in: RingBuf::new(HEAD_BUF),
            origin_out: RingBuf::new(BODY_BUF),
            origin_in: RingBuf::new(BODY_BUF),
            client_out: RingBuf::new(BODY_BUF),
            body: None,
            response_head_sent: false,
            client_body_passthrough: false,
        }
    }

    pub fn client_fd(&self) -> RawFd {
        self.client_fd
    }

    pub fn origin_fd(&self) -> Option<RawFd> {
        self.origin_fd
    }

    fn fail(&mut self, reason: &str) -> Action {
        warn!("connection entering ERROR: {}", reason);
        if !self.response_head_sent && self.state != State::Parse {
            self.queue_error_response(502);
        } else if self.state == State::Parse {
            self.queue_error_response(400);
        }
        self.state = State::Error;
        Action::Close
    }

    fn queue_error_response(&mut self, status: u16) {
        let reason = match status {
            400 => "Bad Request",
            502 => "Bad Gateway",
            504 => "Gateway Timeout",
            _ => "Internal Server Error",
        };
        let body = format!("{} {}", status, reason);
        let resp = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        self.client_out.write_bytes(resp.as_bytes());
        self.response_head_sent = true;
    }

    pub fn on_idle_timeout(&mut self) -> Action {
        self.fail("idle timeout")
    }

    // ---- PARSE ----

    pub fn on_client_readable(&mut self) -> Action {
        match self.state {
            State::Parse => self.pump_parse(),
            State::Connect | State::ForwardHead | State::TransformBody => {
                self.pump_client_body_passthrough()
            }
            _ => Action::None,
        }
    }

    fn pump_parse(&mut self) -> Action {
        if !self.client_in.can_write() {
            return self.fail("request head exceeded buffer capacity");
        }
        let n = match nonblocking_read(self.client_fd, self.client_in.write_ptr()) {
            Ok(Some(0)) => return self.fail("client closed before request head completed"),
            Ok(Some(n)) => n,
            Ok(None) => return Action::None,
            Err(e) => return self.fail(&format!("client read error: {}", e)),
        };
        self.client_in.write_adv(n);

        // Snapshot the unconsumed window before feeding it to the parser:
        // `read_adv` reclaims a drained buffer's space for reuse, so this is
        // the last point at which the bytes the parser is about to consume
        // are guaranteed still to be there afterward.
        let unparsed = self.client_in.read_ptr().to_vec();
        let outcome = self.parser.feed(&mut self.client_in);
        let consumed = unparsed.len() - self.client_in.len();
        self.raw_head.extend_from_slice(&unparsed[..consumed]);

        match outcome {
            ParseOutcome::NeedMore => Action::None,
            ParseOutcome::Error(detail) => self.fail(&format!("parse error: {}", detail)),
            ParseOutcome::Done(head) => {
                trace!("request head parsed: {} {}", head.method, head.path);
                let origin_host = head.origin_host();
                self.head = Some(head);
                match origin_host {
                    Some((host, port)) => {
                        self.state = State::Resolve;
                        Action::NeedResolve { host: host.to_string(), port }
                    }
                    None => self.fail("no absolute-form target or Host header"),
                }
            }
        }
    }

    pub fn on_resolved(&mut self, result: Result<SocketAddr, String>) -> Action {
        match result {
            Ok(addr) => {
                self.state = State::Connect;
                Action::NeedConnect { addr }
            }
            Err(detail) => self.fail(&format!("resolve failed: {}", detail)),
        }
    }

    pub fn on_connect_started(&mut self, origin_fd: RawFd) {
        self.origin_fd = Some(origin_fd);
        self.queue_rewritten_request_line();
    }

    /// Rewrites only the request-line target (spec §4.2); every other header
    /// the client sent — `Host`, `User-Agent`, `Accept`, `Cookie`, whatever
    /// else arrived — passes through unchanged, the way the original
    /// forwards the head verbatim. The only header this proxy ever injects
    /// is `Connection: close`, replacing any the client sent so only one
    /// survives.
    fn queue_rewritten_request_line(&mut self) {
        let head = self.head.as_ref().expect("head set before CONNECT");
        let request_line = format!("{} {} HTTP/{}.{}\r\n", head.method, head.path, head.version_major, head.version_minor);
        self.origin_out.write_bytes(request_line.as_bytes());
        if let Some(headers) = self.original_headers_without_connection() {
            self.origin_out.write_bytes(&headers);
        }
        self.origin_out.write_bytes(b"Connection: close\r\n\r\n");
    }

    /// The client's original header lines (everything after the request
    /// line up to, but not including, the blank line) with any `Connection`
    /// header dropped, each line still terminated with `\r\n`.
    fn original_headers_without_connection(&self) -> Option<Vec<u8>> {
        let line_end = find_subslice(&self.raw_head, b"\r\n")?;
        let headers = &self.raw_head[line_end + 2..];
        let headers = headers.strip_suffix(b"\r\n\r\n").unwrap_or(headers);
        let mut out = Vec::with_capacity(headers.len());
        for line in headers.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() || line.to_ascii_lowercase().starts_with(b"connection:") {
                continue;
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
        Some(out)
    }

    /// CONNECT's writable event: either still connecting (check SO_ERROR)
    /// or already connected and ready to flush the rewritten request line.
    pub fn on_origin_connected(&mut self) -> Action {
        self.state = State::ForwardHead;
        self.flush_origin_out()
    }

    fn flush_origin_out(&mut self) -> Action {
        let Some(origin_fd) = self.origin_fd else { return Action::None };
        if !self.origin_out.can_read() {
            return Action::None;
        }
        match nonblocking_write(origin_fd, self.origin_out.read_ptr()) {
            Ok(Some(n)) => {
                self.origin_out.read_adv(n);
                metrics::increase_transfer_bytes(n as u64);
                Action::None
            }
            Ok(None) => Action::None,
            Err(e) => self.fail(&format!("origin write error: {}", e)),
        }
    }

    pub fn on_origin_writable(&mut self) -> Action {
        match self.state {
            State::ForwardHead => self.flush_origin_out(),
            State::TransformBody => {
                if let Some(BodyMode::Transform(stage)) = &mut self.body {
                    let _ = stage.on_transform_stdin_writable();
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    fn pump_client_body_passthrough(&mut self) -> Action {
        if !self.client_body_passthrough || !self.origin_out.can_write() {
            return Action::None;
        }
        match nonblocking_read(self.client_fd, self.origin_out.write_ptr()) {
            Ok(Some(0)) => {
                self.client_body_passthrough = false;
                Action::None
            }
            Ok(Some(n)) => {
                self.origin_out.write_adv(n);
                self.flush_origin_out()
            }
            Ok(None) => Action::None,
            Err(_) => Action::None,
        }
    }

    // ---- FORWARD_HEAD / TRANSFORM_BODY ----

    pub fn on_origin_readable(&mut self) -> Action {
        match self.state {
            State::ForwardHead => self.pump_forward_head(),
            State::TransformBody => {
                if let Some(origin_fd) = self.origin_fd {
                    match &mut self.body {
                        Some(BodyMode::Transform(stage)) => {
                            let _ = stage.on_origin_readable(origin_fd);
                        }
                        Some(BodyMode::PassThrough(pt)) => {
                            pump_passthrough_origin(pt, origin_fd, &mut self.origin_in, &mut self.client_out);
                        }
                        None => {}
                    }
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    fn pump_forward_head(&mut self) -> Action {
        let Some(origin_fd) = self.origin_fd else { return Action::None };
        if !self.origin_in.can_write() {
            return self.fail("origin response head exceeded buffer capacity");
        }
        let n = match nonblocking_read(origin_fd, self.origin_in.write_ptr()) {
            Ok(Some(0)) => return self.fail("origin closed before response head completed"),
            Ok(Some(n)) => n,
            Ok(None) => return Action::None,
            Err(e) => return self.fail(&format!("origin read error: {}", e)),
        };
        self.origin_in.write_adv(n);

        let head_bytes = self.origin_in.read_ptr();
        let Some(head_end) = response::find_head_end(head_bytes) else {
            return Action::None;
        };
        let head = head_bytes[..head_end].to_vec();
        let body_prefix = head_bytes[head_end..].to_vec();
        self.origin_in.read_adv(head_end);

        let origin_chunked = response::is_chunked(&head);
        debug!("response head received, origin_chunked={}", origin_chunked);

        if self.config.transform_enabled() {
            self.client_out
                .write_bytes(&response::rewrite_head_for_chunked_transform(&head));
            self.response_head_sent = true;
            self.state = State::TransformBody;
            if !body_prefix.is_empty() {
                self.origin_in.write_bytes(&body_prefix);
            }
            return Action::SpawnTransform {
                command: self.config.command.clone(),
                stderr_path: self.config.stderr_path.clone(),
            };
        }

        self.client_out.write_bytes(&head);
        self.response_head_sent = true;
        self.state = State::TransformBody;
        self.body = Some(BodyMode::PassThrough(PassThrough {
            rechunk: origin_chunked,
            origin_eof: false,
        }));
        if !body_prefix.is_empty() {
            self.client_out.write_bytes(&body_prefix);
        }
        Action::None
    }

    pub fn on_transform_spawned(&mut self, child: TransformChild) {
        let mut stage = TransformStage::new(child);
        // Any response bytes buffered ahead of the transform spawn
        // completing (the sliver of body that arrived in the same read as
        // the head) feed the pipeline immediately.
        if self.origin_in.can_read() && self.origin_fd.is_some() {
            let _ = stage.on_origin_readable(self.origin_fd.unwrap());
        }
        self.body = Some(BodyMode::Transform(stage));
    }

    pub fn on_transform_spawn_failed(&mut self) {
        warn!("transform spawn failed, falling back to pass-through");
        self.body = Some(BodyMode::PassThrough(PassThrough {
            rechunk: false,
            origin_eof: false,
        }));
    }

    pub fn on_transform_stdout_readable(&mut self) {
        if let Some(BodyMode::Transform(stage)) = &mut self.body {
            let _ = stage.on_transform_stdout_readable();
        }
    }

    pub fn on_client_writable(&mut self) -> Action {
        match &mut self.body {
            Some(BodyMode::Transform(stage)) => {
                let _ = stage.on_client_writable(self.client_fd);
                if stage.is_finished() {
                    self.state = State::Done;
                }
                Action::None
            }
            _ => {
                if self.client_out.can_read() {
                    match nonblocking_write(self.client_fd, self.client_out.read_ptr()) {
                        Ok(Some(n)) => {
                            self.client_out.read_adv(n);
                            metrics::increase_transfer_bytes(n as u64);
                        }
                        Ok(None) => {}
                        Err(_) => {
                            self.state = State::Error;
                            return Action::Close;
                        }
                    }
                }
                if let Some(BodyMode::PassThrough(pt)) = &self.body {
                    if pt.origin_eof && !self.client_out.can_read() {
                        self.state = State::Done;
                    }
                }
                Action::None
            }
        }
    }

    pub fn interest(&self) -> ConnectionInterest {
        match self.state {
            State::Parse => ConnectionInterest {
                client: Interest::READ,
                origin: Interest::NONE,
                transform_stdin: Interest::NONE,
                transform_stdout: Interest::NONE,
            },
            State::Resolve => ConnectionInterest::none(),
            State::Connect => ConnectionInterest {
                client: Interest::NONE,
                origin: Interest::WRITE,
                transform_stdin: Interest::NONE,
                transform_stdout: Interest::NONE,
            },
            State::ForwardHead => ConnectionInterest {
                client: if self.client_out.can_read() { Interest::WRITE } else { Interest::NONE },
                origin: if self.origin_out.can_read() { Interest::WRITE } else { Interest::READ },
                transform_stdin: Interest::NONE,
                transform_stdout: Interest::NONE,
            },
            State::TransformBody => match &self.body {
                Some(BodyMode::Transform(stage)) => {
                    let ti = stage.interest();
                    ConnectionInterest {
                        client: ti.client,
                        origin: ti.origin,
                        transform_stdin: ti.transform_stdin,
                        transform_stdout: ti.transform_stdout,
                    }
                }
                Some(BodyMode::PassThrough(pt)) => ConnectionInterest {
                    client: if self.client_out.can_read() { Interest::WRITE } else { Interest::NONE },
                    origin: if !pt.origin_eof && self.client_out.can_write() { Interest::READ } else { Interest::NONE },
                    transform_stdin: Interest::NONE,
                    transform_stdout: Interest::NONE,
                },
                None => ConnectionInterest::none(),
            },
            State::Done | State::Error => ConnectionInterest::none(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Done | State::Error)
    }

    pub fn shutdown(&mut self) {
        if let Some(BodyMode::Transform(stage)) = &mut self.body {
            stage.shutdown();
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn pump_passthrough_origin(
    pt: &mut PassThrough,
    origin_fd: RawFd,
    origin_in: &mut RingBuf,
    client_out: &mut RingBuf,
) {
    if pt.origin_eof || !origin_in.can_write() {
        return;
    }
    match nonblocking_read(origin_fd, origin_in.write_ptr()) {
        Ok(Some(0)) => {
            pt.origin_eof = true;
            if pt.rechunk {
                crate::transform::chunked::send_last_chunk(client_out);
            }
        }
        Ok(Some(n)) => {
            origin_in.write_adv(n);
            if pt.rechunk {
                crate::transform::chunked::prepare_chunked(client_out, origin_in);
            } else {
                let bytes = origin_in.read_ptr().to_vec();
                origin_in.read_adv(bytes.len());
                client_out.write_bytes(&bytes);
            }
        }
        Ok(None) => {}
        Err(_) => {
            pt.origin_eof = true;
        }
    }
}

pub struct ConnectionInterest {
    pub client: Interest,
    pub origin: Interest,
    pub transform_stdin: Interest,
    pub transform_stdout: Interest,
}

impl ConnectionInterest {
    fn none() -> Self {
        ConnectionInterest {
            client: Interest::NONE,
            origin: Interest::NONE,
            transform_stdin: Interest::NONE,
            transform_stdout: Interest::NONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    #[test]
    fn new_connection_starts_in_parse_wanting_client_read() {
        let conn = Connection::new(-1, test_config());
        assert_eq!(conn.state, State::Parse);
        assert!(conn.interest().client.read);
    }

    #[test]
    fn queue_error_response_marks_head_sent() {
        let mut conn = Connection::new(-1, test_config());
        conn.queue_error_response(400);
        assert!(conn.response_head_sent);
        assert!(conn.client_out.can_read());
    }

    #[test]
    fn rewritten_request_line_forwards_other_headers_and_drops_connection() {
        let mut conn = Connection::new(-1, test_config());
        conn.raw_head = b"GET http://example.com/a HTTP/1.1\r\n\
Host: example.com\r\n\
User-Agent: curl/8.0\r\n\
Accept: */*\r\n\
Connection: keep-alive\r\n\
Cookie: session=abc\r\n\
\r\n"
            .to_vec();
        conn.head = Some(RequestHead {
            method: "GET".to_string(),
            scheme_host: Some("example.com".to_string()),
            scheme_port: Some(80),
            path: "/a".to_string(),
            version_major: 1,
            version_minor: 1,
            host_header: Some("example.com".to_string()),
        });

        conn.queue_rewritten_request_line();

        let sent = String::from_utf8(conn.origin_out.read_ptr().to_vec()).unwrap();
        assert_eq!(
            sent,
            "GET /a HTTP/1.1\r\n\
Host: example.com\r\n\
User-Agent: curl/8.0\r\n\
Accept: */*\r\n\
Cookie: session=abc\r\n\
Connection: close\r\n\r\n"
        );
    }
}
