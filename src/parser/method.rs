//! Method token parser: case-sensitive prefix match against a fixed
//! whitelist, committed on whitespace (spec §4.2, `parseMethodChar` in the
//! original `handleParsers.c`).

use super::Feed;

const METHODS: &[&str] = &[
    "GET", "POST", "HEAD", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

const MAX_METHOD_LEN: usize = 7; // len("OPTIONS")

pub struct MethodParser {
    buf: String,
}

impl MethodParser {
    pub fn new() -> Self {
        MethodParser { buf: String::new() }
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        if byte == b' ' {
            return if METHODS.contains(&self.buf.as_str()) {
                Feed::Done
            } else {
                Feed::Error
            };
        }
        if !byte.is_ascii_uppercase() || self.buf.len() >= MAX_METHOD_LEN {
            return Feed::Error;
        }
        self.buf.push(byte as char);
        // Fail fast once no whitelisted method could still match this
        // prefix, rather than waiting for the terminating space.
        if METHODS.iter().any(|m| m.starts_with(self.buf.as_str())) {
            Feed::Continue
        } else {
            Feed::Error
        }
    }

    pub fn method(&self) -> &str {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(s: &[u8]) -> Feed {
        let mut p = MethodParser::new();
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
    fn accepts_known_methods() {
        assert_eq!(feed_all(b"GET "), Feed::Done);
        assert_eq!(feed_all(b"POST "), Feed::Done);
        assert_eq!(feed_all(b"HEAD "), Feed::Done);
    }

    #[test]
    fn rejects_unknown_token() {
        assert_eq!(feed_all(b"FOO "), Feed::Error);
    }

    #[test]
    fn rejects_lowercase() {
        assert_eq!(feed_all(b"get "), Feed::Error);
    }
}
