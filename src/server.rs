//! Top-level accept loop and event dispatch. Owns the connection arena
//! (integer handles over fds, per spec §9 Design Notes), the `Selector`,
//! and the `Resolver`, and translates each readiness event into the right
//! `Connection` callback.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use mio::{Token, Waker};

use crate::admin::session::AdminSession;
use crate::admin::socket::SctpSocket;
use crate::config::Config;
use crate::connection::{Action, Connection, State};
use crate::net;
use crate::resolver::{PendingResolutions, Resolver};
use crate::selector::{Interest, Selector};
use crate::transform::{CommandStatus, TransformChild};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const ADMIN_LISTENER_TOKEN: Token = Token(2);
const FIRST_CONN_TOKEN: usize = 3;
const ENDPOINTS_PER_CONN: usize = 4;
/// Admin session tokens live in a disjoint range so they never collide with
/// connection-slot tokens, which grow from `FIRST_CONN_TOKEN`.
const ADMIN_SESSION_BASE: usize = 1 << 32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Client,
    Origin,
    TransformStdin,
    TransformStdout,
}

fn decode_token(token: Token) -> Option<(usize, Endpoint)> {
    let raw = token.0;
    if raw < FIRST_CONN_TOKEN {
        return None;
    }
    let offset = raw - FIRST_CONN_TOKEN;
    let slot = offset / ENDPOINTS_PER_CONN;
    let endpoint = match offset % ENDPOINTS_PER_CONN {
        0 => Endpoint::Client,
        1 => Endpoint::Origin,
        2 => Endpoint::TransformStdin,
        3 => Endpoint::TransformStdout,
        _ => unreachable!(),
    };
    Some((slot, endpoint))
}

fn encode_token(slot: usize, endpoint: Endpoint) -> Token {
    let e = match endpoint {
        Endpoint::Client => 0,
        Endpoint::Origin => 1,
        Endpoint::TransformStdin => 2,
        Endpoint::TransformStdout => 3,
    };
    Token(FIRST_CONN_TOKEN + slot * ENDPOINTS_PER_CONN + e)
}

struct Slot {
    conn: Connection,
    registered: [bool; ENDPOINTS_PER_CONN],
}

pub struct Server {
    config: Arc<Config>,
    selector: Selector,
    resolver: Resolver,
    pending_resolutions: PendingResolutions,
    listener_fd: RawFd,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    admin_listener: Option<SctpSocket>,
    admin_sessions: Vec<Option<AdminSession>>,
    admin_free: Vec<usize>,
}

impl Server {
    pub fn new(config: Config) -> std::io::Result<Self> {
        let config = Arc::new(config);
        let addr = SocketAddr::from_str(&format!("{}:{}", config.listen_addr, config.listen_port))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let listener_fd = net::listen(addr, 1024)?;

        let mut selector = Selector::new(1024)?;
        selector.register(listener_fd, LISTENER_TOKEN, Interest::READ)?;

        let waker = Arc::new(Waker::new(selector.registry(), WAKER_TOKEN)?);
        let resolver = Resolver::new(waker);

        info!("listening on {}", addr);

        // The admin protocol is a secondary surface (spec §4.6): if the
        // host kernel has no SCTP support, or the admin bind address is
        // already taken, the proxy still serves HTTP traffic without it.
        let admin_addr = SocketAddr::from_str(&format!("{}:{}", config.admin_addr, config.admin_port))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let admin_listener = match SctpSocket::listen_with_streams(admin_addr, 128, config.admin_streams) {
            Ok(sock) => {
                sock.set_nonblocking(true)?;
                selector.register(sock.as_raw_fd(), ADMIN_LISTENER_TOKEN, Interest::READ)?;
                info!("admin protocol listening on {}", admin_addr);
                Some(sock)
            }
            Err(e) => {
                warn!("admin protocol socket unavailable, continuing without it: {}", e);
                None
            }
        };

        Ok(Server {
            config,
            selector,
            resolver,
            pending_resolutions: PendingResolutions::default(),
            listener_fd,
            slots: Vec::new(),
            free: Vec::new(),
            admin_listener,
            admin_sessions: Vec::new(),
            admin_free: Vec::new(),
        })
    }

    pub fn run(&mut self) -> std::io::Result<()> {
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        loop {
            let events = self.selector.poll(Some(Duration::from_secs(1)))?;
            for ev in events {
                self.dispatch(ev.token, ev.readable, ev.writable);
            }
            for token in self.selector.expired(idle_timeout) {
                if let Some((slot, Endpoint::Client)) = decode_token(token) {
                    self.handle_action(slot, self.slot_conn_mut(slot).on_idle_timeout());
                }
            }
            self.reap_finished();
            self.reap_finished_admin();
        }
    }

    fn slot_conn_mut(&mut self, slot: usize) -> &mut Connection {
        &mut self.slots[slot].as_mut().expect("slot missing").conn
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        if token == LISTENER_TOKEN {
            self.accept_loop();
            return;
        }
        if token == ADMIN_LISTENER_TOKEN {
            self.admin_accept_loop();
            return;
        }
        if token.0 >= ADMIN_SESSION_BASE {
            self.dispatch_admin(token, readable, writable);
            return;
        }
        if token == WAKER_TOKEN {
            let outcomes = self.resolver.drain();
            for outcome in outcomes {
                if let Some((slot, Endpoint::Client)) = decode_token(outcome.token) {
                    if self.pending_resolutions.take(outcome.token) {
                        let action = self.slot_conn_mut(slot).on_resolved(outcome.result);
                        self.handle_action(slot, action);
                    }
                }
            }
            return;
        }
        let Some((slot, endpoint)) = decode_token(token) else { return };
        if self.slots.get(slot).and_then(|s| s.as_ref()).is_none() {
            return;
        }

        // A single readiness event can carry both bits; drive read and
        // write independently rather than picking one via a guard, or a
        // socket that's simultaneously readable and writable would starve
        // one side until the next poll wakes it again.
        if readable {
            let action = match endpoint {
                Endpoint::Client => self.slot_conn_mut(slot).on_client_readable(),
                Endpoint::Origin => self.slot_conn_mut(slot).on_origin_readable(),
                Endpoint::TransformStdout => {
                    self.slot_conn_mut(slot).on_transform_stdout_readable();
                    Action::None
                }
                Endpoint::TransformStdin => Action::None,
            };
            self.handle_action(slot, action);
        }
        if writable && self.slots.get(slot).and_then(|s| s.as_ref()).is_some() {
            let action = match endpoint {
                Endpoint::Client => self.slot_conn_mut(slot).on_client_writable(),
                Endpoint::Origin if self.slot_conn_mut(slot).state == State::Connect => {
                    self.finish_connect(slot)
                }
                Endpoint::Origin => self.slot_conn_mut(slot).on_origin_writable(),
                Endpoint::TransformStdin => self.slot_conn_mut(slot).on_origin_writable(),
                Endpoint::TransformStdout => Action::None,
            };
            self.handle_action(slot, action);
        }
        self.sync_interest(slot);
    }

    fn finish_connect(&mut self, slot: usize) -> Action {
        let Some(origin_fd) = self.slot_conn_mut(slot).origin_fd() else { return Action::None };
        match net::take_connect_error(origin_fd) {
            Ok(()) => self.slot_conn_mut(slot).on_origin_connected(),
            Err(e) => {
                warn!("origin connect failed: {}", e);
                self.slot_conn_mut(slot).on_idle_timeout() // reuses the fail-and-close path
            }
        }
    }

    fn accept_loop(&mut self) {
        loop {
            match net::accept(self.listener_fd) {
                Ok(Some((fd, peer))) => {
                    debug!("accepted client {}", peer);
                    self.new_connection(fd);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn new_connection(&mut self, client_fd: RawFd) {
        let conn = Connection::new(client_fd, Arc::clone(&self.config));
        let slot = self.alloc_slot(conn);
        if let Err(e) = self
            .selector
            .register(client_fd, encode_token(slot, Endpoint::Client), Interest::READ)
        {
            error!("failed to register client fd: {}", e);
            self.free_slot(slot);
            return;
        }
        self.slots[slot].as_mut().unwrap().registered[0] = true;
    }

    fn alloc_slot(&mut self, conn: Connection) -> usize {
        let slot = Slot {
            conn,
            registered: [false; ENDPOINTS_PER_CONN],
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn free_slot(&mut self, slot: usize) {
        if self.slots[slot].is_none() {
            return;
        }
        self.slots[slot].as_mut().unwrap().conn.shutdown();
        let registered = self.slots[slot].as_ref().unwrap().registered;
        for (i, registered) in registered.iter().copied().enumerate() {
            if registered {
                let token = Token(FIRST_CONN_TOKEN + slot * ENDPOINTS_PER_CONN + i);
                if let Ok(fd) = self.selector.unregister(token) {
                    let _ = nix::unistd::close(fd);
                }
            }
        }
        self.slots[slot] = None;
        self.free.push(slot);
    }

    fn handle_action(&mut self, slot: usize, action: Action) {
        match action {
            Action::None => {}
            Action::Close => self.free_slot(slot),
            Action::NeedResolve { host, port } => {
                let token = encode_token(slot, Endpoint::Client);
                self.pending_resolutions.mark_pending(token);
                self.resolver.resolve(token, host, port);
            }
            Action::NeedConnect { addr } => match net::connect_nonblocking(addr) {
                Ok(origin_fd) => {
                    self.slot_conn_mut(slot).on_connect_started(origin_fd);
                    if let Err(e) = self.selector.register(
                        origin_fd,
                        encode_token(slot, Endpoint::Origin),
                        Interest::WRITE,
                    ) {
                        error!("failed to register origin fd: {}", e);
                        self.free_slot(slot);
                        return;
                    }
                    self.slots[slot].as_mut().unwrap().registered[1] = true;
                }
                Err(e) => {
                    warn!("connect failed: {}", e);
                    self.free_slot(slot);
                }
            },
            Action::SpawnTransform { command, stderr_path } => {
                match TransformChild::spawn(&command, &stderr_path) {
                    Ok(child) => {
                        let stdin_fd = child.write_fd;
                        let stdout_fd = child.read_fd;
                        self.slot_conn_mut(slot).on_transform_spawned(child);
                        let _ = self.selector.register(
                            stdin_fd,
                            encode_token(slot, Endpoint::TransformStdin),
                            Interest::NONE,
                        );
                        let _ = self.selector.register(
                            stdout_fd,
                            encode_token(slot, Endpoint::TransformStdout),
                            Interest::READ,
                        );
                        self.slots[slot].as_mut().unwrap().registered[2] = true;
                        self.slots[slot].as_mut().unwrap().registered[3] = true;
                    }
                    Err(status) => {
                        warn!("transform spawn failed: {:?}", status);
                        self.slot_conn_mut(slot).on_transform_spawn_failed();
                    }
                }
            }
        }
        self.sync_interest(slot);
    }

    /// Recomputes and applies the interest for every still-registered
    /// endpoint of `slot` (spec §4.4: recomputed from scratch after every
    /// I/O event).
    fn sync_interest(&mut self, slot: usize) {
        if self.slots.get(slot).and_then(|s| s.as_ref()).is_none() {
            return;
        }
        let wanted = self.slot_conn_mut(slot).interest();
        let registered = self.slots[slot].as_ref().unwrap().registered;
        let apply = vec![
            (Endpoint::Client, wanted.client, registered[0]),
            (Endpoint::Origin, wanted.origin, registered[1]),
            (Endpoint::TransformStdin, wanted.transform_stdin, registered[2]),
            (Endpoint::TransformStdout, wanted.transform_stdout, registered[3]),
        ];
        for (endpoint, interest, is_registered) in apply {
            if is_registered {
                let _ = self.selector.set_interest(encode_token(slot, endpoint), interest);
            }
        }
        if self.slot_conn_mut(slot).is_terminal() {
            self.free_slot(slot);
        }
    }

    fn admin_accept_loop(&mut self) {
        let Some(listener) = &self.admin_listener else { return };
        loop {
            match listener.accept() {
                Ok((sock, peer)) => {
                    debug!("accepted admin session {}", peer);
                    if let Err(e) = sock.set_nonblocking(true) {
                        warn!("failed to set admin session nonblocking: {}", e);
                        continue;
                    }
                    let fd = sock.as_raw_fd();
                    let session = AdminSession::new(sock);
                    let idx = if let Some(idx) = self.admin_free.pop() {
                        self.admin_sessions[idx] = Some(session);
                        idx
                    } else {
                        self.admin_sessions.push(Some(session));
                        self.admin_sessions.len() - 1
                    };
                    let token = Token(ADMIN_SESSION_BASE + idx);
                    if let Err(e) = self.selector.register(fd, token, Interest::READ) {
                        error!("failed to register admin session fd: {}", e);
                        self.admin_sessions[idx] = None;
                        self.admin_free.push(idx);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("admin accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn dispatch_admin(&mut self, token: Token, readable: bool, writable: bool) {
        let idx = token.0 - ADMIN_SESSION_BASE;
        let Some(Some(session)) = self.admin_sessions.get_mut(idx) else { return };
        if readable {
            session.on_readable();
        }
        if writable {
            session.on_writable();
        }
        let interest = session.interest();
        if interest.is_empty() {
            self.free_admin_session(idx);
            return;
        }
        let _ = self.selector.set_interest(token, interest);
    }

    fn free_admin_session(&mut self, idx: usize) {
        if self.admin_sessions.get(idx).and_then(|s| s.as_ref()).is_none() {
            return;
        }
        let token = Token(ADMIN_SESSION_BASE + idx);
        if let Ok(fd) = self.selector.unregister(token) {
            let _ = nix::unistd::close(fd);
        }
        self.admin_sessions[idx] = None;
        self.admin_free.push(idx);
    }

    fn reap_finished_admin(&mut self) {
        let finished: Vec<usize> = self
            .admin_sessions
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.is_finished()).map(|_| i))
            .collect();
        for idx in finished {
            self.free_admin_session(idx);
        }
    }

    fn reap_finished(&mut self) {
        let terminal: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.conn.is_terminal()).map(|_| i))
            .collect();
        for slot in terminal {
            self.free_slot(slot);
        }
    }
}
