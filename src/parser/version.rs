//! HTTP version parser: strictly `HTTP/<digit>.<digit>` followed by the
//! request line's terminating CRLF (spec §4.2).

use super::Feed;

const LITERAL: &[u8] = b"HTTP/";

#[derive(Clone, Copy)]
enum Phase {
    Literal(usize),
    Major,
    Dot,
    Minor,
    Cr,
    Lf,
}

pub struct VersionParser {
    phase: Phase,
    major: u8,
    minor: u8,
}

impl VersionParser {
    pub fn new() -> Self {
        VersionParser {
            phase: Phase::Literal(0),
            major: 0,
            minor: 0,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        match self.phase {
            Phase::Literal(matched) => {
                if byte != LITERAL[matched] {
                    return Feed::Error;
                }
                let matched = matched + 1;
                self.phase = if matched == LITERAL.len() {
                    Phase::Major
                } else {
                    Phase::Literal(matched)
                };
                Feed::Continue
            }
            Phase::Major => {
                // The proxy speaks HTTP/1.x only (spec §6); a syntactically
                // digit-shaped but unsupported major version (e.g. "9") is
                // still a version ERROR, not merely an unsupported-but-valid
                // parse (spec §8 scenario 6).
                if byte != b'1' {
                    return Feed::Error;
                }
                self.major = byte - b'0';
                self.phase = Phase::Dot;
                Feed::Continue
            }
            Phase::Dot => {
                if byte != b'.' {
                    return Feed::Error;
                }
                self.phase = Phase::Minor;
                Feed::Continue
            }
            Phase::Minor => {
                if byte != b'0' && byte != b'1' {
                    return Feed::Error;
                }
                self.minor = byte - b'0';
                self.phase = Phase::Cr;
                Feed::Continue
            }
            Phase::Cr => {
                if byte != b'\r' {
                    return Feed::Error;
                }
                self.phase = Phase::Lf;
                Feed::Continue
            }
            Phase::Lf => {
                if byte != b'\n' {
                    return Feed::Error;
                }
                Feed::Done
            }
        }
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(s: &[u8]) -> Feed {
        let mut p = VersionParser::new();
        let mut last = Feed::Continue;
        for &b in s {
            last = p.feed(b);
            if last != Feed::Continue {
                return last;
            }
        }
        last
    }

    #[test]
    fn accepts_http_1_1() {
        assert_eq!(feed_all(b"HTTP/1.1\r\n"), Feed::Done);
    }

    #[test]
    fn accepts_http_1_0() {
        assert_eq!(feed_all(b"HTTP/1.0\r\n"), Feed::Done);
    }

    #[test]
    fn rejects_unsupported_major_version() {
        assert_eq!(feed_all(b"HTTP/9.9\r\n"), Feed::Error);
        assert_eq!(feed_all(b"HTTP/x.1\r\n"), Feed::Error);
    }

    #[test]
    fn rejects_wrong_literal() {
        assert_eq!(feed_all(b"HTCP/1.1\r\n"), Feed::Error);
    }
}
