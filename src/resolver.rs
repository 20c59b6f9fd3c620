//! DNS resolution worker (ambient stack, spec §10/§4.1/§5).
//!
//! The core's `RESOLVE` state only needs an asynchronous
//! `resolve(host) -> address` callback; the spec treats the resolver itself
//! as an external collaborator. This implements the minimal version of that
//! contract: a hostname lookup is handed to a short-lived OS thread (since
//! `getaddrinfo` has no portable non-blocking form), and completion is
//! signalled back into the selector loop through a `mio::Waker`, mirroring
//! the `on_block`/`selector_notify_block` pattern the spec calls out.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use mio::{Token, Waker};

pub struct ResolveOutcome {
    pub token: Token,
    pub result: Result<SocketAddr, String>,
}

/// Owns the completion channel and waker; `server.rs` polls `drain()` once
/// woken to collect finished lookups keyed by the connection's token.
pub struct Resolver {
    tx: Sender<ResolveOutcome>,
    rx: Receiver<ResolveOutcome>,
    waker: Arc<Waker>,
}

impl Resolver {
    pub fn new(waker: Arc<Waker>) -> Self {
        let (tx, rx) = channel();
        Resolver { tx, rx, waker }
    }

    /// Spawns a worker thread that resolves `host:port` and wakes the
    /// selector loop on completion. Non-blocking from the caller's
    /// perspective: this returns immediately.
    pub fn resolve(&self, token: Token, host: String, port: u16) {
        let tx = self.tx.clone();
        let waker = Arc::clone(&self.waker);
        thread::spawn(move || {
            let result = (host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| e.to_string())
                .and_then(|mut addrs| {
                    addrs.next().ok_or_else(|| "no addresses returned".to_string())
                });
            let _ = tx.send(ResolveOutcome { token, result });
            let _ = waker.wake();
        });
    }

    /// Drains every lookup that has completed since the last call.
    pub fn drain(&self) -> Vec<ResolveOutcome> {
        self.rx.try_iter().collect()
    }
}

/// Tracks which connection a pending resolution belongs to, for callers
/// that want a typed lookup rather than matching on `Token` alone.
#[derive(Default)]
pub struct PendingResolutions {
    pending: HashMap<Token, ()>,
}

impl PendingResolutions {
    pub fn mark_pending(&mut self, token: Token) {
        self.pending.insert(token, ());
    }

    pub fn take(&mut self, token: Token) -> bool {
        self.pending.remove(&token).is_some()
    }
}
