//! Single-threaded readiness multiplexer (spec §4.1). Wraps `mio::Poll` and
//! adds the bookkeeping the spec's contract needs on top of it: an explicit
//! `NOOP` interest state that a registration can sit in without being torn
//! down, last-activity timestamps for the idle-timeout scan (spec §5), and
//! a guard against double-registering the same token.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};

/// Readiness interest bitset. `NONE` ("NOOP" in the spec) is a legal,
/// distinct state: the fd stays owned/bookkept by the selector but is not
/// currently polled by the OS reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { read: false, write: false };
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };
    pub const BOTH: Interest = Interest { read: true, write: true };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }

    fn to_mio(self) -> Option<mio::Interest> {
        match (self.read, self.write) {
            (false, false) => None,
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (true, true) => Some(mio::Interest::READABLE.add(mio::Interest::WRITABLE)),
        }
    }
}

/// A single readiness event translated out of `mio`'s representation.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

struct Registration {
    fd: RawFd,
    interest: Interest,
    /// Whether `interest` is currently mirrored into the `mio` registry.
    /// `false` while `interest` is `NONE`, since `mio` refuses to register
    /// an empty interest set.
    active: bool,
    last_activity: Instant,
}

pub struct Selector {
    poll: Poll,
    events: Events,
    regs: HashMap<Token, Registration>,
}

impl Selector {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Selector {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
            regs: HashMap::new(),
        })
    }

    /// Registers `fd` under `token` with the given interest. Panics (a
    /// programmer error, not a runtime one) if `token` is already
    /// registered — the spec's invariant 2 ("no fd is ever registered
    /// twice") is enforced here rather than left to chance.
    pub fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        assert!(
            !self.regs.contains_key(&token),
            "token {:?} already registered",
            token
        );
        let active = if let Some(mio_interest) = interest.to_mio() {
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), token, mio_interest)?;
            true
        } else {
            false
        };
        self.regs.insert(
            token,
            Registration {
                fd,
                interest,
                active,
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn set_interest(&mut self, token: Token, interest: Interest) -> io::Result<()> {
        let reg = self
            .regs
            .get_mut(&token)
            .expect("set_interest on an unregistered token");
        reg.last_activity = Instant::now();
        if reg.interest == interest {
            return Ok(());
        }
        match (reg.active, interest.to_mio()) {
            (true, Some(mio_interest)) => {
                self.poll
                    .registry()
                    .reregister(&mut SourceFd(&reg.fd), token, mio_interest)?;
            }
            (true, None) => {
                self.poll.registry().deregister(&mut SourceFd(&reg.fd))?;
                reg.active = false;
            }
            (false, Some(mio_interest)) => {
                self.poll
                    .registry()
                    .register(&mut SourceFd(&reg.fd), token, mio_interest)?;
                reg.active = true;
            }
            (false, None) => {}
        }
        reg.interest = interest;
        Ok(())
    }

    /// Drops the registration entirely, returning the owned fd so the
    /// caller can close it. This is the only operation that actually
    /// shrinks the connection reference count (spec invariant 3).
    pub fn unregister(&mut self, token: Token) -> io::Result<RawFd> {
        let reg = self
            .regs
            .remove(&token)
            .expect("unregister on an unregistered token");
        if reg.active {
            self.poll.registry().deregister(&mut SourceFd(&reg.fd))?;
        }
        Ok(reg.fd)
    }

    /// Exposes the underlying `mio` registry so a `Waker` can be created
    /// against the same poll instance.
    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.regs.contains_key(&token)
    }

    pub fn registered_count(&self) -> usize {
        self.regs.len()
    }

    /// Blocks for readiness events up to `timeout`, returning each as a
    /// `Readiness`. A `None` timeout blocks until at least one fd is ready.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut out = Vec::new();
        for ev in self.events.iter() {
            let token = ev.token();
            if let Some(reg) = self.regs.get_mut(&token) {
                reg.last_activity = Instant::now();
            }
            out.push(Readiness {
                token,
                readable: ev.is_readable(),
                writable: ev.is_writable(),
            });
        }
        Ok(out)
    }

    /// Idle-timeout scan (spec §5): returns tokens whose last activity is
    /// older than `idle_timeout`. Resolution is bounded by how often the
    /// caller invokes this, which the run loop does at >= 1s intervals.
    pub fn expired(&self, idle_timeout: Duration) -> Vec<Token> {
        let now = Instant::now();
        self.regs
            .iter()
            .filter(|(_, reg)| now.duration_since(reg.last_activity) >= idle_timeout)
            .map(|(token, _)| *token)
            .collect()
    }

    pub fn touch(&mut self, token: Token) {
        if let Some(reg) = self.regs.get_mut(&token) {
            reg.last_activity = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_noop_keeps_bookkeeping_but_drops_mio_registration() {
        let mut sel = Selector::new(8).unwrap();
        let (r, _w) = nix::unistd::pipe().unwrap();
        sel.register(r, Token(1), Interest::READ).unwrap();
        assert!(sel.is_registered(Token(1)));
        sel.set_interest(Token(1), Interest::NONE).unwrap();
        assert!(sel.is_registered(Token(1)), "NOOP must not unregister");
        sel.unregister(Token(1)).unwrap();
        assert!(!sel.is_registered(Token(1)));
        nix::unistd::close(r).ok();
    }

    #[test]
    #[should_panic]
    fn double_register_panics() {
        let mut sel = Selector::new(8).unwrap();
        let (r, _w) = nix::unistd::pipe().unwrap();
        sel.register(r, Token(1), Interest::READ).unwrap();
        sel.register(r, Token(1), Interest::READ).unwrap();
    }
}
