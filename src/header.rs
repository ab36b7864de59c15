//! The 16-byte wire header shared by every framed message.
//!
//! Grounded on `struct mq_msg_header` / `write_header` in the original
//! `mq.c`: five magic bytes, two unspecified padding bytes, a one-byte
//! type tag, and an 8-byte big-endian length.

use std::io;

pub const HDR_SIZE: usize = 16;
pub const MAGIC: &[u8; 5] = b"DSmsg";

/// The parsed form of a 16-byte wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u8,
    pub len: u64,
}

impl Header {
    pub fn encode(self) -> [u8; HDR_SIZE] {
        let mut out = [0u8; HDR_SIZE];
        out[0..5].copy_from_slice(MAGIC);
        // out[5..7] is padding; sender writes zero, receiver ignores it.
        out[7] = self.kind;
        out[8..16].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    /// Decodes a complete 16-byte header, rejecting a bad magic as a
    /// protocol violation.
    pub fn decode(buf: &[u8; HDR_SIZE]) -> io::Result<Header> {
        if &buf[0..5] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad message header magic",
            ));
        }
        let kind = buf[7];
        let len = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        Ok(Header { kind, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        for (kind, len) in [(0u8, 0u64), (0, 5), (255, 1 << 32), (1, u64::MAX)] {
            let encoded = Header { kind, len }.encode();
            let decoded = Header::decode(&encoded).unwrap();
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.len, len);
        }
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let encoded = Header { kind: 0, len: 5 }.encode();
        assert_eq!(&encoded[0..5], b"DSmsg");
        assert_eq!(encoded[7], 0);
        assert_eq!(&encoded[8..16], &5u64.to_be_bytes());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = [0u8; HDR_SIZE];
        buf[0..5].copy_from_slice(b"XXmsg");
        assert!(Header::decode(&buf).is_err());
    }
}
