//! Minimal origin response head handling (spec §4.3 FORWARD_HEAD / §6): just
//! enough structure to find where the head ends, tell whether the origin
//! used chunked transfer-encoding, and rewrite the head when the transform
//! stage is about to take over the body.

/// Looks for the blank line ending the response head. Returns the offset
/// just past the terminating `\r\n\r\n`, i.e. where the body begins.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn lines(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    head.split(|&b| b == b'\n').map(|line| {
        line.strip_suffix(b"\r").unwrap_or(line)
    })
}

fn header_name_matches(line: &[u8], name: &str) -> bool {
    match line.iter().position(|&b| b == b':') {
        Some(colon) => line[..colon].eq_ignore_ascii_case(name.as_bytes()),
        None => false,
    }
}

/// Whether the origin marked its own body as chunked (`Transfer-Encoding:
/// chunked`, case-insensitively, ignoring leading/trailing header
/// whitespace).
pub fn is_chunked(head: &[u8]) -> bool {
    lines(head).any(|line| {
        header_name_matches(line, "transfer-encoding")
            && line
                .split(|&b| b == b':')
                .nth(1)
                .map(|v| {
                    std::str::from_utf8(v)
                        .unwrap_or("")
                        .trim()
                        .eq_ignore_ascii_case("chunked")
                })
                .unwrap_or(false)
    })
}

/// Rebuilds the response head with any `Content-Length`/`Transfer-Encoding`
/// header dropped and a `Transfer-Encoding: chunked` header injected — used
/// when the transform stage is taking over the body and will re-chunk it
/// itself regardless of how the origin framed it.
pub fn rewrite_head_for_chunked_transform(head: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len() + 32);
    let mut saw_status_line = false;
    for line in lines(head) {
        if line.is_empty() {
            break; // the blank line that ends the head; re-add it below.
        }
        if !saw_status_line {
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
            saw_status_line = true;
            continue;
        }
        if header_name_matches(line, "content-length") || header_name_matches(line, "transfer-encoding") {
            continue;
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_head_end() {
        let buf = b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        let end = find_head_end(buf).unwrap();
        assert_eq!(&buf[end..], b"abc");
    }

    #[test]
    fn detects_chunked_case_insensitively() {
        let head = b"HTTP/1.1 200 OK\r\ntransfer-encoding: Chunked\r\n\r\n";
        assert!(is_chunked(head));
    }

    #[test]
    fn non_chunked_head_is_not_chunked() {
        let head = b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\n";
        assert!(!is_chunked(head));
    }

    #[test]
    fn rewrite_drops_length_and_injects_chunked() {
        let head = b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\nX-Foo: bar\r\n\r\n";
        let rewritten = rewrite_head_for_chunked_transform(head);
        let text = String::from_utf8(rewritten).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!text.to_lowercase().contains("content-length"));
        assert!(text.contains("X-Foo: bar\r\n"));
        assert!(text.ends_with("Transfer-Encoding: chunked\r\n\r\n"));
    }
}
