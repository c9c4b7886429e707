//! Servo bus frame: `[HDR, addr, cmd, payload…, checksum]`
//! (`spec.md` §3, "Servo frame" and §6, "RS485 wire format").

use crate::error::CodecError;
use crate::opcode::Opcode;

/// Header byte for every outbound request (`0xFA`, fixed).
pub const REQUEST_HEADER: u8 = 0xFA;

/// A request frame ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub addr: u8,
    pub cmd: u8,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn new(addr: u8, cmd: Opcode, payload: Vec<u8>) -> Self {
        Self {
            addr,
            cmd: cmd.as_u8(),
            payload,
        }
    }

    /// Encode as `[0xFA, addr, cmd, payload…, checksum]` where checksum is
    /// the low byte of the sum of all preceding bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.payload.len() + 1);
        out.push(REQUEST_HEADER);
        out.push(self.addr);
        out.push(self.cmd);
        out.extend_from_slice(&self.payload);
        let checksum = checksum_of(&out);
        out.push(checksum);
        out
    }
}

/// A decoded response frame: header/address already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub addr: u8,
    pub cmd: u8,
    pub payload: Vec<u8>,
}

/// Sum of all bytes, truncated to the low byte — the checksum algorithm
/// used in both directions (`spec.md` I2).
pub fn checksum_of(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Decode a response frame.
///
/// `expected_header` is configurable because the spec notes older
/// documentation uses a distinct reply header (`0xFB`) while this core
/// treats the header as a per-direction configuration value rather than a
/// hardcoded constant.
pub fn decode_response(
    bytes: &[u8],
    expected_header: u8,
    expected_addr: u8,
) -> Result<ResponseFrame, CodecError> {
    // header + addr + cmd + checksum is the minimum possible frame.
    if bytes.len() < 4 {
        return Err(CodecError::Truncated {
            need: 4,
            got: bytes.len(),
        });
    }

    if bytes[0] != expected_header {
        return Err(CodecError::BadHeader {
            expected: expected_header,
            got: bytes[0],
        });
    }

    let (body, checksum_byte) = bytes.split_at(bytes.len() - 1);
    let checksum_byte = checksum_byte[0];
    let computed = checksum_of(body);
    if computed != checksum_byte {
        return Err(CodecError::BadChecksum {
            in_frame: checksum_byte,
            computed,
        });
    }

    let addr = bytes[1];
    if addr != expected_addr {
        return Err(CodecError::AddressMismatch {
            expected: expected_addr,
            got: addr,
        });
    }

    let cmd = bytes[2];
    let payload = bytes[3..bytes.len() - 1].to_vec();

    Ok(ResponseFrame { addr, cmd, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_payload() {
        let req = RequestFrame::new(2, Opcode::Rpm, vec![]);
        let bytes = req.encode();
        assert_eq!(bytes[0], REQUEST_HEADER);
        assert_eq!(bytes[1], 2);
        assert_eq!(bytes[2], Opcode::Rpm.as_u8());

        // Build a synthetic response mirroring the request, using the same
        // header for this test (the header is configurable per direction).
        let mut resp = vec![REQUEST_HEADER, 2, Opcode::Rpm.as_u8(), 0x01, 0x2C];
        let sum = checksum_of(&resp);
        resp.push(sum);

        let decoded = decode_response(&resp, REQUEST_HEADER, 2).unwrap();
        assert_eq!(decoded.addr, 2);
        assert_eq!(decoded.cmd, Opcode::Rpm.as_u8());
        assert_eq!(decoded.payload, vec![0x01, 0x2C]);
    }

    #[test]
    fn checksum_identity_rejects_tampered_frame() {
        let mut resp = vec![REQUEST_HEADER, 1, 0x30, 0xAA, 0xBB];
        let sum = checksum_of(&resp);
        resp.push(sum);
        // Flip a payload byte without touching the checksum.
        resp[3] ^= 0xFF;
        let err = decode_response(&resp, REQUEST_HEADER, 1).unwrap_err();
        assert!(matches!(err, CodecError::BadChecksum { .. }));
    }

    #[test]
    fn rejects_wrong_header() {
        let mut resp = vec![0xFB, 1, 0x30];
        let sum = checksum_of(&resp);
        resp.push(sum);
        let err = decode_response(&resp, REQUEST_HEADER, 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::BadHeader {
                expected: REQUEST_HEADER,
                got: 0xFB
            }
        );
    }

    #[test]
    fn rejects_address_mismatch() {
        let mut resp = vec![REQUEST_HEADER, 3, 0x30];
        let sum = checksum_of(&resp);
        resp.push(sum);
        let err = decode_response(&resp, REQUEST_HEADER, 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::AddressMismatch {
                expected: 1,
                got: 3
            }
        );
    }

    #[test]
    fn rejects_truncated_frame() {
        let err = decode_response(&[REQUEST_HEADER, 1], REQUEST_HEADER, 1).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }
}
