//! Bit-packed admin protocol wire codec (spec §4.6 / §6). Pure encode/decode
//! functions over byte slices — no socket I/O here, so this is unit
//! testable without SCTP.

pub const VERSION_BYTE: u8 = 0x80;

// Authentication response status bits.
pub const AUTH_GENERAL_ERR: u8 = 0x80;
pub const AUTH_VERSION_ERR: u8 = 0x40;
pub const AUTH_AUTH_ERR: u8 = 0x20;

// Request byte 0: opcode (2 bits) + id (6 bits).
pub const ID_MASK: u8 = 0x3F;
pub const OPCODE_MASK: u8 = 0xC0;
pub const OPCODE_BYE: u8 = 0x00;
pub const OPCODE_GET: u8 = 0x40;
pub const OPCODE_SET: u8 = 0x80;

// Response byte 0: per-field error bits.
pub const RESP_GENERAL_ERR: u8 = 0x80;
pub const RESP_OPCODE_ERR: u8 = 0x40;
pub const RESP_TTAG_ERR: u8 = 0x20;
pub const RESP_ID_ERR: u8 = 0x10;

// SET payload framing.
pub const INFO_BYTES: usize = 2;
pub const CONCRET_DATA_BLOCK_BYTES: usize = 8;
pub const DATA_BLOCK_BYTES: usize = INFO_BYTES + CONCRET_DATA_BLOCK_BYTES;
pub const IS_FINAL_BYTE: u8 = 0x10;
pub const START_DATA_BYTE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Bye,
    Get,
    Set,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Opcode> {
        match bits & OPCODE_MASK {
            OPCODE_BYE => Some(Opcode::Bye),
            OPCODE_GET => Some(Opcode::Get),
            OPCODE_SET => Some(Opcode::Set),
            _ => None,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Opcode::Bye => OPCODE_BYE,
            Opcode::Get => OPCODE_GET,
            Opcode::Set => OPCODE_SET,
        }
    }
}

/// A decoded request header: opcode, 6-bit id, and (for GET/SET) the
/// timeTag that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub id: u8,
}

pub fn encode_opcode_id(opcode: Opcode, id: u8) -> u8 {
    opcode.to_bits() | (id & ID_MASK)
}

pub fn decode_opcode_id(byte: u8) -> Option<RequestHeader> {
    let opcode = Opcode::from_bits(byte)?;
    Some(RequestHeader { opcode, id: byte & ID_MASK })
}

/// `timeTag_t` is serialized big-endian (network byte order) on the wire.
/// The original source `memcpy`s a host-order `uint64_t`; this
/// implementation fixes one explicit representation rather than carrying
/// the ambiguity forward.
pub fn encode_time_tag(tag: u64) -> [u8; 8] {
    tag.to_be_bytes()
}

pub fn decode_time_tag(bytes: &[u8; 8]) -> u64 {
    u64::from_be_bytes(*bytes)
}

/// Builds the authentication request: `0x80 ‖ username\0 ‖ password\0`.
pub fn encode_auth_request(username: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + username.len() + password.len() + 2);
    out.push(VERSION_BYTE);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    pub general_err: bool,
    pub version_err: bool,
    pub auth_err: bool,
    /// Populated only when `version_err` is set: the server's unary-encoded
    /// protocol version, i.e. the count of leading 1-bits following the
    /// three status bits.
    pub server_version: Option<u8>,
}

/// Decodes a 1-byte authentication response. The version decoder keeps the
/// original's two-pass structure over the same byte: the first pass walks
/// the leading run of 1-bits counting `server_version`, the second confirms
/// it terminated on a 0-bit or the byte boundary. This is safe only because
/// the first pass always stops within the same byte — noted here rather
/// than silently restructured.
pub fn decode_auth_response(byte: u8) -> AuthResponse {
    let general_err = byte & AUTH_GENERAL_ERR != 0;
    let version_err = byte & AUTH_VERSION_ERR != 0;
    let auth_err = byte & AUTH_AUTH_ERR != 0;

    let server_version = if version_err {
        let mut count = 0u8;
        for bit in (0..5).rev() {
            if byte & (1 << bit) != 0 {
                count += 1;
            } else {
                break;
            }
        }
        Some(count)
    } else {
        None
    };

    AuthResponse {
        general_err,
        version_err,
        auth_err,
        server_version,
    }
}

/// Encodes a 1-byte authentication response. `server_version` is only
/// meaningful when `version_err` is set, and is written back using the same
/// unary run of leading 1-bits `decode_auth_response` expects.
pub fn encode_auth_response(general_err: bool, version_err: bool, auth_err: bool, server_version: u8) -> u8 {
    let mut byte = 0u8;
    if general_err {
        byte |= AUTH_GENERAL_ERR;
    }
    if auth_err {
        byte |= AUTH_AUTH_ERR;
    }
    if version_err {
        byte |= AUTH_VERSION_ERR;
        for i in 0..server_version.min(5) {
            byte |= 1 << (4 - i);
        }
    }
    byte
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub general_err: bool,
    pub opcode_err: bool,
    pub ttag_err: bool,
    pub id_err: bool,
}

pub fn encode_response_header(
    general_err: bool,
    opcode_err: bool,
    ttag_err: bool,
    id_err: bool,
) -> u8 {
    let mut byte = 0u8;
    if general_err {
        byte |= RESP_GENERAL_ERR;
    }
    if opcode_err {
        byte |= RESP_OPCODE_ERR;
    }
    if ttag_err {
        byte |= RESP_TTAG_ERR;
    }
    if id_err {
        byte |= RESP_ID_ERR;
    }
    byte
}

pub fn decode_response_header(byte: u8) -> ResponseHeader {
    ResponseHeader {
        general_err: byte & RESP_GENERAL_ERR != 0,
        opcode_err: byte & RESP_OPCODE_ERR != 0,
        ttag_err: byte & RESP_TTAG_ERR != 0,
        id_err: byte & RESP_ID_ERR != 0,
    }
}

/// Splits `payload` into fixed 10-byte blocks (2 framing bytes + 8 data
/// bytes) for a SET. The first block is left-padded with zero bytes so the
/// padded payload length is a multiple of 8; the last block sets
/// `IS_FINAL_BYTE`.
pub fn encode_set_blocks(payload: &[u8]) -> Vec<[u8; DATA_BLOCK_BYTES]> {
    let pad = (CONCRET_DATA_BLOCK_BYTES - payload.len() % CONCRET_DATA_BLOCK_BYTES)
        % CONCRET_DATA_BLOCK_BYTES;
    let mut padded = vec![0u8; pad];
    padded.extend_from_slice(payload);

    let chunks: Vec<&[u8]> = padded.chunks(CONCRET_DATA_BLOCK_BYTES).collect();
    let n = chunks.len().max(1);
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut block = [0u8; DATA_BLOCK_BYTES];
            block[0] = if i + 1 == n { IS_FINAL_BYTE } else { 0 };
            block[1] = START_DATA_BYTE;
            block[INFO_BYTES..].copy_from_slice(chunk);
            block
        })
        .collect()
}

/// Reassembles a SET payload from its wire blocks, dropping the left-pad.
pub fn decode_set_blocks(blocks: &[[u8; DATA_BLOCK_BYTES]], payload_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks.len() * CONCRET_DATA_BLOCK_BYTES);
    for block in blocks {
        out.extend_from_slice(&block[INFO_BYTES..]);
    }
    let pad = out.len().saturating_sub(payload_len);
    out.split_off(pad)
}

pub fn block_is_final(block: &[u8; DATA_BLOCK_BYTES]) -> bool {
    block[0] & IS_FINAL_BYTE != 0
}

pub fn block_has_start_marker(block: &[u8; DATA_BLOCK_BYTES]) -> bool {
    block[1] & START_DATA_BYTE != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_id_round_trips() {
        let byte = encode_opcode_id(Opcode::Get, 0x2A);
        let header = decode_opcode_id(byte).unwrap();
        assert_eq!(header.opcode, Opcode::Get);
        assert_eq!(header.id, 0x2A);
    }

    #[test]
    fn time_tag_round_trips_big_endian() {
        let encoded = encode_time_tag(0x0102030405060708);
        assert_eq!(encoded, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decode_time_tag(&encoded), 0x0102030405060708);
    }

    #[test]
    fn auth_request_is_null_terminated() {
        let req = encode_auth_request("bob", "hunter2");
        assert_eq!(req[0], VERSION_BYTE);
        assert_eq!(&req[1..4], b"bob");
        assert_eq!(req[4], 0);
        assert_eq!(&req[5..12], b"hunter2");
        assert_eq!(req[12], 0);
    }

    #[test]
    fn auth_response_decodes_clean_success() {
        let resp = decode_auth_response(0x00);
        assert!(!resp.general_err && !resp.version_err && !resp.auth_err);
        assert_eq!(resp.server_version, None);
    }

    #[test]
    fn auth_response_decodes_version_error_with_unary_version() {
        // version_err (bit 6) set, auth_err (bit 5) clear, then three
        // leading 1-bits (4,3,2) in the 5 remaining bits: 0b0101_1100.
        let resp = decode_auth_response(0b0101_1100);
        assert!(resp.version_err);
        assert!(!resp.auth_err);
        assert_eq!(resp.server_version, Some(3));
    }

    #[test]
    fn set_blocks_pad_and_mark_final() {
        let blocks = encode_set_blocks(b"hello"); // 5 bytes -> 1 block, pad 3
        assert_eq!(blocks.len(), 1);
        assert!(block_is_final(&blocks[0]));
        assert!(block_has_start_marker(&blocks[0]));
        let restored = decode_set_blocks(&blocks, 5);
        assert_eq!(restored, b"hello".to_vec());
    }

    #[test]
    fn set_block_wire_layout_matches_info_then_start_marker() {
        let blocks = encode_set_blocks(b"hello");
        // byte 0 is the IS_FINAL info byte, byte 1 is the START_DATA sentinel.
        assert_eq!(blocks[0][0], IS_FINAL_BYTE);
        assert_eq!(blocks[0][1], START_DATA_BYTE);
    }

    #[test]
    fn set_blocks_split_across_multiple_blocks() {
        let payload = b"0123456789abcdef"; // 16 bytes -> exactly 2 blocks
        let blocks = encode_set_blocks(payload);
        assert_eq!(blocks.len(), 2);
        assert!(!block_is_final(&blocks[0]));
        assert!(block_is_final(&blocks[1]));
        let restored = decode_set_blocks(&blocks, payload.len());
        assert_eq!(restored, payload.to_vec());
    }

    #[test]
    fn auth_response_encode_decode_round_trips_with_version() {
        let byte = encode_auth_response(false, true, false, 4);
        let resp = decode_auth_response(byte);
        assert!(resp.version_err);
        assert!(!resp.general_err && !resp.auth_err);
        assert_eq!(resp.server_version, Some(4));
    }

    #[test]
    fn response_header_round_trips() {
        let byte = encode_response_header(false, true, false, true);
        let header = decode_response_header(byte);
        assert!(!header.general_err);
        assert!(header.opcode_err);
        assert!(!header.ttag_err);
        assert!(header.id_err);
    }
}
