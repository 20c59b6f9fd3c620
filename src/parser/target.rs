//! Request-target parser: absolute-form (`http://host[:port]/path`) or
//! origin-form (`/path`), terminated by the space before the HTTP version
//! token (spec §4.2).

use super::Feed;

const SCHEME_PREFIX: &[u8] = b"http://";

enum Phase {
    Start,
    MatchingScheme(usize),
    Host,
    Port,
    Path,
}

pub struct TargetParser {
    phase: Phase,
    host: String,
    port_buf: String,
    port: Option<u16>,
    path: String,
}

impl TargetParser {
    pub fn new() -> Self {
        TargetParser {
            phase: Phase::Start,
            host: String::new(),
            port_buf: String::new(),
            port: None,
            path: String::new(),
        }
    }

    fn finish_port(&mut self) -> bool {
        if self.port_buf.is_empty() {
            return true;
        }
        match self.port_buf.parse::<u16>() {
            Ok(p) => {
                self.port = Some(p);
                true
            }
            Err(_) => false,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        match self.phase {
            Phase::Start => {
                if byte == b'/' {
                    self.phase = Phase::Path;
                    self.path.push('/');
                    Feed::Continue
                } else if byte.to_ascii_lowercase() == SCHEME_PREFIX[0] {
                    self.phase = Phase::MatchingScheme(1);
                    Feed::Continue
                } else {
                    Feed::Error
                }
            }
            Phase::MatchingScheme(matched) => {
                if byte.to_ascii_lowercase() != SCHEME_PREFIX[matched] {
                    return Feed::Error;
                }
                let matched = matched + 1;
                if matched == SCHEME_PREFIX.len() {
                    self.phase = Phase::Host;
                } else {
                    self.phase = Phase::MatchingScheme(matched);
                }
                Feed::Continue
            }
            Phase::Host => {
                if byte == b' ' {
                    Feed::Done
                } else if byte == b':' {
                    self.phase = Phase::Port;
                    Feed::Continue
                } else if byte == b'/' {
                    self.phase = Phase::Path;
                    self.path.push('/');
                    Feed::Continue
                } else if is_host_byte(byte) {
                    self.host.push(byte as char);
                    Feed::Continue
                } else {
                    Feed::Error
                }
            }
            Phase::Port => {
                if byte == b' ' {
                    if self.finish_port() {
                        Feed::Done
                    } else {
                        Feed::Error
                    }
                } else if byte == b'/' {
                    if !self.finish_port() {
                        return Feed::Error;
                    }
                    self.phase = Phase::Path;
                    self.path.push('/');
                    Feed::Continue
                } else if byte.is_ascii_digit() {
                    self.port_buf.push(byte as char);
                    Feed::Continue
                } else {
                    Feed::Error
                }
            }
            Phase::Path => {
                if byte == b' ' {
                    Feed::Done
                } else if byte.is_ascii_graphic() {
                    self.path.push(byte as char);
                    Feed::Continue
                } else {
                    Feed::Error
                }
            }
        }
    }

    pub fn host(&self) -> Option<&str> {
        if self.host.is_empty() {
            None
        } else {
            Some(&self.host)
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn is_host_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'[' | b']')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(s: &[u8]) -> (Feed, TargetParser) {
        let mut p = TargetParser::new();
        let mut last = Feed::Continue;
        for &b in s {
            last = p.feed(b);
            if last != Feed::Continue {
                break;
            }
        }
        (last, p)
    }

    #[test]
    fn origin_form_path_only() {
        let (res, p) = feed_all(b"/a/b ");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.host(), None);
        assert_eq!(p.path(), "/a/b");
    }

    #[test]
    fn absolute_form_with_port() {
        let (res, p) = feed_all(b"http://example.com:8080/path ");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.host(), Some("example.com"));
        assert_eq!(p.port(), Some(8080));
        assert_eq!(p.path(), "/path");
    }

    #[test]
    fn absolute_form_without_port_defaults_unset() {
        let (res, p) = feed_all(b"http://example.com/path ");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.port(), None);
    }

    #[test]
    fn garbage_scheme_is_an_error() {
        let (res, _) = feed_all(b"httpz://x/y ");
        assert_eq!(res, Feed::Error);
    }
}
