//! Header-line parser: line-oriented, case-insensitive name matching that
//! records only the `Host:` value (everything else passes through
//! unmodified since the engine never needs to inspect it — spec §4.2).

use super::Feed;

const MAX_LINE: usize = 8192;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Start of a line: could be a header name, leading whitespace (an
    /// obs-fold continuation of the previous line), or the empty line that
    /// terminates the header block.
    LineStart,
    Name,
    /// Skipping optional whitespace right after the colon.
    Ows,
    Value,
    Cr,
    /// Saw CRLF once; a second CRLF in a row ends the header block.
    AfterCrlf,
}

pub struct HeaderParser {
    phase: Phase,
    name: String,
    value: String,
    host: Option<String>,
    saw_any_header: bool,
    line_len: usize,
}

impl HeaderParser {
    pub fn new() -> Self {
        HeaderParser {
            phase: Phase::LineStart,
            name: String::new(),
            value: String::new(),
            host: None,
            saw_any_header: false,
            line_len: 0,
        }
    }

    fn commit_header(&mut self) {
        if self.name.eq_ignore_ascii_case("host") {
            self.host = Some(self.value.trim().to_string());
        }
        self.name.clear();
        self.value.clear();
        self.saw_any_header = true;
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        self.line_len += 1;
        if self.line_len > MAX_LINE {
            return Feed::Error;
        }
        match self.phase {
            Phase::LineStart => {
                if byte == b'\r' {
                    self.phase = Phase::AfterCrlf;
                    return Feed::Continue;
                }
                if byte == b' ' || byte == b'\t' {
                    // RFC 7230 §3.2.4: obs-fold continuation is recognized
                    // but rejected when there is no preceding header value
                    // to continue.
                    if !self.saw_any_header {
                        return Feed::Error;
                    }
                    self.phase = Phase::Ows;
                    return Feed::Continue;
                }
                if byte == b':' {
                    return Feed::Error;
                }
                self.name.push(byte as char);
                self.phase = Phase::Name;
                Feed::Continue
            }
            Phase::Name => {
                if byte == b':' {
                    self.phase = Phase::Ows;
                    Feed::Continue
                } else if byte == b'\r' || byte == b'\n' {
                    Feed::Error
                } else {
                    self.name.push(byte as char);
                    Feed::Continue
                }
            }
            Phase::Ows => {
                if byte == b' ' || byte == b'\t' {
                    Feed::Continue
                } else if byte == b'\r' {
                    self.phase = Phase::Cr;
                    Feed::Continue
                } else {
                    self.value.push(byte as char);
                    self.phase = Phase::Value;
                    Feed::Continue
                }
            }
            Phase::Value => {
                if byte == b'\r' {
                    self.phase = Phase::Cr;
                    Feed::Continue
                } else {
                    self.value.push(byte as char);
                    Feed::Continue
                }
            }
            Phase::Cr => {
                if byte != b'\n' {
                    return Feed::Error;
                }
                self.commit_header();
                self.line_len = 0;
                self.phase = Phase::LineStart;
                Feed::Continue
            }
            Phase::AfterCrlf => {
                if byte != b'\n' {
                    return Feed::Error;
                }
                Feed::Done
            }
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(s: &[u8]) -> (Feed, HeaderParser) {
        let mut p = HeaderParser::new();
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
    fn empty_headers_terminate_immediately() {
        let (res, p) = feed_all(b"\r\n");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.host(), None);
    }

    #[test]
    fn records_host_case_insensitively() {
        let (res, p) = feed_all(b"hOsT: example.com\r\n\r\n");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.host(), Some("example.com"));
    }

    #[test]
    fn ignores_other_headers() {
        let (res, p) = feed_all(b"X-Foo: bar\r\nHost: x\r\nX-Baz: qux\r\n\r\n");
        assert_eq!(res, Feed::Done);
        assert_eq!(p.host(), Some("x"));
    }

    #[test]
    fn fold_continuation_without_prior_header_is_error() {
        let (res, _) = feed_all(b" continued\r\n\r\n");
        assert_eq!(res, Feed::Error);
    }

    #[test]
    fn missing_colon_is_error() {
        let (res, _) = feed_all(b"NoColonHere\r\n\r\n");
        assert_eq!(res, Feed::Error);
    }
}
