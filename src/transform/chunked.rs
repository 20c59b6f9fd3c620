//! HTTP/1.1 chunked transfer-encoding framing (spec §4.4 `prepareChunkedBuffer`
//! / `sentLastChunked`). Pure functions over `RingBuf`s so they're testable
//! without a selector or a socket.

use crate::buffer::RingBuf;

/// Frames every byte currently readable in `src` as one chunk appended to
/// `chunk_buf`: hex length (lowercase, no leading zeros), CRLF, the bytes
/// themselves (draining `src`), CRLF. A no-op if `src` has nothing to drain
/// — the original only ever calls this once per refill, after establishing
/// there is something to frame.
pub fn prepare_chunked(chunk_buf: &mut RingBuf, src: &mut RingBuf) {
    let n = src.len();
    if n == 0 {
        return;
    }
    let header = format!("{:x}\r\n", n);
    chunk_buf.write_bytes(header.as_bytes());
    let bytes: Vec<u8> = src.read_ptr().to_vec();
    src.read_adv(n);
    chunk_buf.write_bytes(&bytes);
    chunk_buf.write_bytes(b"\r\n");
}

/// Emits the terminal `0\r\n\r\n` chunk.
pub fn send_last_chunk(chunk_buf: &mut RingBuf) {
    chunk_buf.write_bytes(b"0\r\n\r\n");
}

/// Test/verification helper: reverses chunk framing back into the
/// concatenation of the original bodies (spec §8 round-trip law).
#[cfg(test)]
pub fn unchunk(framed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = framed[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("malformed chunk header");
        let len_str = std::str::from_utf8(&framed[pos..pos + line_end]).unwrap();
        let len = usize::from_str_radix(len_str, 16).unwrap();
        pos += line_end + 2;
        if len == 0 {
            break;
        }
        out.extend_from_slice(&framed[pos..pos + len]);
        pos += len + 2; // skip body + trailing CRLF
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_one_chunk_per_refill() {
        let mut src = RingBuf::new(16);
        src.write_bytes(b"abc");
        let mut chunk = RingBuf::new(32);
        prepare_chunked(&mut chunk, &mut src);
        assert_eq!(chunk.read_ptr(), b"3\r\nabc\r\n");
        assert!(!src.can_read());
    }

    #[test]
    fn last_chunk_is_zero_length_terminator() {
        let mut chunk = RingBuf::new(16);
        send_last_chunk(&mut chunk);
        assert_eq!(chunk.read_ptr(), b"0\r\n\r\n");
    }

    #[test]
    fn round_trip_multiple_chunks() {
        let mut chunk = RingBuf::new(256);
        for piece in [&b"hello "[..], &b"world"[..]] {
            let mut src = RingBuf::new(64);
            src.write_bytes(piece);
            prepare_chunked(&mut chunk, &mut src);
        }
        send_last_chunk(&mut chunk);
        let framed = chunk.read_ptr().to_vec();
        assert_eq!(unchunk(&framed), b"hello world".to_vec());
    }

    #[test]
    fn empty_source_frames_nothing() {
        let mut src = RingBuf::new(8);
        let mut chunk = RingBuf::new(8);
        prepare_chunked(&mut chunk, &mut src);
        assert!(!chunk.can_read());
    }
}
