//! Composite request-line/header parser: a chain of four sub-parsers, each
//! fed one byte at a time from the connection's read ring, exactly as
//! `handleParsers.c`'s `parseProcess` drives `parseMethodChar` /
//! `parseTargetChar` / `parseVersionChar` / `parseHeaderChar` in sequence
//! over the same buffer within a single read callback.

mod header;
mod method;
mod target;
mod version;

pub use header::HeaderParser;
pub use method::MethodParser;
pub use target::TargetParser;
pub use version::VersionParser;

use crate::buffer::RingBuf;

/// Result of feeding one byte to a sub-parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Continue,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Method,
    Target,
    Version,
    Header,
    Done,
    Error,
}

/// The parsed request head: method, target components and the one header
/// value the engine cares about.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: String,
    pub scheme_host: Option<String>,
    pub scheme_port: Option<u16>,
    pub path: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub host_header: Option<String>,
}

impl RequestHead {
    /// Absolute-form target wins over the Host header per RFC 7230 §5.4 —
    /// this is the observable behavior of the original source (spec §4.2
    /// tie-break).
    pub fn origin_host(&self) -> Option<(&str, u16)> {
        if let Some(h) = &self.scheme_host {
            if !h.is_empty() {
                return Some((h.as_str(), self.scheme_port.unwrap_or(80)));
            }
        }
        self.host_header.as_deref().map(|h| {
            let (host, port) = split_host_port(h);
            (host, port)
        })
    }

    pub fn is_head_method(&self) -> bool {
        self.method == "HEAD"
    }
}

fn split_host_port(h: &str) -> (&str, u16) {
    match h.rsplit_once(':') {
        Some((host, port)) => port.parse().map(|p| (host, p)).unwrap_or((h, 80)),
        None => (h, 80),
    }
}

/// Outcome of draining a batch of newly-available bytes through the
/// composite state machine.
pub enum ParseOutcome {
    /// Head not fully parsed yet, keep reading.
    NeedMore,
    /// Head complete; origin selection may proceed.
    Done(RequestHead),
    /// A sub-parser rejected the input; composite state is now `ERROR` and
    /// stays there (spec §4.2: "a single terminal ERROR").
    Error(String),
}

pub struct RequestParser {
    stage: Stage,
    method: MethodParser,
    target: TargetParser,
    version: VersionParser,
    header: HeaderParser,
    head: RequestHead,
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            stage: Stage::Method,
            method: MethodParser::new(),
            target: TargetParser::new(),
            version: VersionParser::new(),
            header: HeaderParser::new(),
            head: RequestHead::default(),
        }
    }

    /// Drains every byte currently available in `input`, advancing the read
    /// cursor as each sub-parser consumes it. Stops early on `Done`/`Error`;
    /// a caller with `ParseOutcome::NeedMore` should call again once more
    /// bytes have arrived.
    pub fn feed(&mut self, input: &mut RingBuf) -> ParseOutcome {
        loop {
            if self.stage == Stage::Done {
                return ParseOutcome::Done(self.head.clone());
            }
            if self.stage == Stage::Error {
                return ParseOutcome::Error("parser is in a terminal error state".to_string());
            }
            let Some(b) = input.read_byte() else {
                return ParseOutcome::NeedMore;
            };
            match self.stage {
                Stage::Method => match self.method.feed(b) {
                    Feed::Continue => {}
                    Feed::Done => {
                        self.head.method = self.method.method().to_string();
                        self.stage = Stage::Target;
                    }
                    Feed::Error => {
                        self.stage = Stage::Error;
                        return ParseOutcome::Error(format!(
                            "unrecognized method token: {:?}",
                            self.method.method()
                        ));
                    }
                },
                Stage::Target => match self.target.feed(b) {
                    Feed::Continue => {}
                    Feed::Done => {
                        self.head.scheme_host = self.target.host().map(|s| s.to_string());
                        self.head.scheme_port = self.target.port();
                        self.head.path = self.target.path().to_string();
                        self.stage = Stage::Version;
                    }
                    Feed::Error => {
                        self.stage = Stage::Error;
                        return ParseOutcome::Error("malformed request target".to_string());
                    }
                },
                Stage::Version => match self.version.feed(b) {
                    Feed::Continue => {}
                    Feed::Done => {
                        self.head.version_major = self.version.major();
                        self.head.version_minor = self.version.minor();
                        self.stage = Stage::Header;
                    }
                    Feed::Error => {
                        self.stage = Stage::Error;
                        return ParseOutcome::Error("malformed HTTP version".to_string());
                    }
                },
                Stage::Header => match self.header.feed(b) {
                    Feed::Continue => {}
                    Feed::Done => {
                        self.head.host_header = self.header.host().map(|s| s.to_string());
                        self.stage = Stage::Done;
                    }
                    Feed::Error => {
                        self.stage = Stage::Error;
                        return ParseOutcome::Error("malformed header line".to_string());
                    }
                },
                Stage::Done | Stage::Error => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(raw: &[u8]) -> ParseOutcome {
        let mut buf = RingBuf::new(raw.len().max(64));
        buf.write_bytes(raw);
        RequestParser::new().feed(&mut buf)
    }

    fn parse_chunked(raw: &[u8], chunk_sizes: &[usize]) -> ParseOutcome {
        let mut buf = RingBuf::new(raw.len().max(64));
        let mut parser = RequestParser::new();
        // Feed the bytes in the requested chunk sizes (falling back to 1 byte
        // at a time once the list is exhausted) to exercise the parser's
        // resumability across arbitrary read-callback boundaries.
        let mut pos = 0;
        let mut idx = 0;
        loop {
            if pos >= raw.len() {
                return parser.feed(&mut buf);
            }
            let take = if idx < chunk_sizes.len() { chunk_sizes[idx] } else { 1 };
            let take = take.min(raw.len() - pos);
            buf.write_bytes(&raw[pos..pos + take]);
            pos += take;
            idx += 1;
            match parser.feed(&mut buf) {
                ParseOutcome::NeedMore => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn parses_simple_origin_form_request() {
        let raw = b"GET /a HTTP/1.0\r\nHost: x\r\n\r\n";
        match parse_all(raw) {
            ParseOutcome::Done(head) => {
                assert_eq!(head.method, "GET");
                assert_eq!(head.path, "/a");
                assert_eq!(head.version_major, 1);
                assert_eq!(head.version_minor, 0);
                assert_eq!(head.origin_host(), Some(("x", 80)));
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn parses_absolute_form_and_prefers_it_over_host_header() {
        let raw = b"GET http://example.com:8080/path HTTP/1.1\r\nHost: other\r\n\r\n";
        match parse_all(raw) {
            ParseOutcome::Done(head) => {
                assert_eq!(head.path, "/path");
                assert_eq!(head.origin_host(), Some(("example.com", 8080)));
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn bad_version_is_an_error() {
        let raw = b"GET / HTTP/9.9\r\n\r\n";
        match parse_all(raw) {
            ParseOutcome::Error(_) => {}
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn arbitrary_chunking_yields_same_result_as_one_pass() {
        let raw: &[u8] = b"GET http://a.test:81/p HTTP/1.1\r\nHost: ignored\r\nX-Foo: bar\r\n\r\n";
        let whole = match parse_all(raw) {
            ParseOutcome::Done(h) => h,
            _ => panic!("expected Done"),
        };
        let chunked = match parse_chunked(raw, &[1, 3, 7, 2, 5, 1, 1, 1]) {
            ParseOutcome::Done(h) => h,
            _ => panic!("expected Done"),
        };
        assert_eq!(whole.method, chunked.method);
        assert_eq!(whole.path, chunked.path);
        assert_eq!(whole.scheme_host, chunked.scheme_host);
        assert_eq!(whole.scheme_port, chunked.scheme_port);
        assert_eq!(whole.version_major, chunked.version_major);
        assert_eq!(whole.version_minor, chunked.version_minor);
    }
}
