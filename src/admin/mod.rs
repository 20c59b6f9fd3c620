//! Bit-packed admin control protocol over SCTP (spec §4.6/§6): a stream-0
//! authentication handshake followed by BYE/GET/SET operations on other
//! streams.

pub mod session;
pub mod socket;
pub mod wire;

use crate::error::{AdminError, AdminResult};
use wire::{
    decode_auth_response, decode_opcode_id, decode_response_header, decode_set_blocks,
    decode_time_tag, encode_auth_request, encode_opcode_id, encode_response_header,
    encode_set_blocks, encode_time_tag, Opcode, RequestHeader, ResponseHeader, DATA_BLOCK_BYTES,
};

pub const AUTH_STREAM: u16 = 0;

/// A decoded, fully-framed request read off an operation stream.
pub struct Request {
    pub header: RequestHeader,
    pub time_tag: u64,
    /// Present only for `Opcode::Set`.
    pub payload: Option<Vec<u8>>,
}

/// Parses `opcode_id ‖ time_tag [‖ chunked SET payload]` from `bytes`.
pub fn decode_request(bytes: &[u8]) -> AdminResult<Request> {
    if bytes.len() < 9 {
        return Err(AdminError::Truncated);
    }
    let header = decode_opcode_id(bytes[0]).ok_or(AdminError::BadOpcode(bytes[0]))?;
    let mut tag_bytes = [0u8; 8];
    tag_bytes.copy_from_slice(&bytes[1..9]);
    let time_tag = decode_time_tag(&tag_bytes);

    let payload = if header.opcode == Opcode::Set {
        let block_bytes = &bytes[9..];
        if block_bytes.len() % DATA_BLOCK_BYTES != 0 {
            return Err(AdminError::Truncated);
        }
        let mut blocks = Vec::with_capacity(block_bytes.len() / DATA_BLOCK_BYTES);
        for chunk in block_bytes.chunks(DATA_BLOCK_BYTES) {
            let mut block = [0u8; DATA_BLOCK_BYTES];
            block.copy_from_slice(chunk);
            blocks.push(block);
        }
        // No out-of-band length accompanies a SET request, so the left-pad
        // added at encode time can't be distinguished from real zero bytes
        // here; the full padded-to-8 payload is returned and callers that
        // know the logical length trim it themselves.
        let declared_len = blocks.len() * (DATA_BLOCK_BYTES - 2);
        Some(decode_set_blocks(&blocks, declared_len))
    } else {
        None
    };

    Ok(Request {
        header,
        time_tag,
        payload,
    })
}

/// Encodes a request for the given opcode, id and time tag, appending the
/// chunked SET payload framing when `payload` is `Some`.
pub fn encode_request(opcode: Opcode, id: u8, time_tag: u64, payload: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(encode_opcode_id(opcode, id));
    out.extend_from_slice(&encode_time_tag(time_tag));
    if let Some(payload) = payload {
        for block in encode_set_blocks(payload) {
            out.extend_from_slice(&block);
        }
    }
    out
}

pub fn encode_response(header: ResponseHeader) -> u8 {
    encode_response_header(
        header.general_err,
        header.opcode_err,
        header.ttag_err,
        header.id_err,
    )
}

pub fn parse_response(byte: u8) -> ResponseHeader {
    decode_response_header(byte)
}

pub fn build_auth_request(username: &str, password: &str) -> Vec<u8> {
    encode_auth_request(username, password)
}

pub fn parse_auth_response(byte: u8) -> wire::AuthResponse {
    decode_auth_response(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_request_round_trips() {
        let encoded = encode_request(Opcode::Get, 7, 42, None);
        let req = decode_request(&encoded).unwrap();
        assert_eq!(req.header.opcode, Opcode::Get);
        assert_eq!(req.header.id, 7);
        assert_eq!(req.time_tag, 42);
        assert!(req.payload.is_none());
    }

    #[test]
    fn set_request_round_trips_payload() {
        let encoded = encode_request(Opcode::Set, 3, 99, Some(b"config-blob"));
        let req = decode_request(&encoded).unwrap();
        assert_eq!(req.header.opcode, Opcode::Set);
        assert_eq!(req.payload.as_deref(), Some(&b"config-blob"[..]));
    }

    #[test]
    fn truncated_request_is_rejected() {
        assert!(matches!(decode_request(&[0x40, 1, 2]), Err(AdminError::Truncated)));
    }
}
