//! The receive-path drive loop. Grounded on `flush_recv` in the original
//! `mq.c`.

use std::io::{self, Read};
use std::net::TcpStream;

use crate::errno;
use crate::header::{Header, HDR_SIZE};
use crate::msg::Msg;

/// A Msg mid-assembly: the raw header bytes, the parsed header once
/// available, and the payload cursor.
pub(crate) struct PartialRecv {
    hdr: [u8; HDR_SIZE],
    hdr_pos: usize,
    parsed: Option<Header>,
    buf: Vec<u8>,
    buf_pos: usize,
}

impl PartialRecv {
    fn new() -> PartialRecv {
        PartialRecv {
            hdr: [0u8; HDR_SIZE],
            hdr_pos: 0,
            parsed: None,
            buf: Vec::new(),
            buf_pos: 0,
        }
    }
}

/// Advances the in-progress receive, if any, starting a fresh one when
/// `current` is empty. Returns `Ok(Some(msg))` once a complete message has
/// been assembled, `Ok(None)` if a transient condition halted progress
/// first. A zero-byte read is reported as `io::ErrorKind::UnexpectedEof`
/// (clean peer close, `geterror` stays 0); a bad magic is reported as
/// `io::ErrorKind::InvalidData` (poisoned connection); anything else is a
/// genuine fatal error. All three latch the Endpoint into ERROR upstream.
pub(crate) fn flush_recv(
    stream: &mut TcpStream,
    current: &mut Option<PartialRecv>,
) -> io::Result<Option<Msg>> {
    if current.is_none() {
        *current = Some(PartialRecv::new());
    }

    loop {
        let partial = current.as_mut().expect("just populated above");

        if partial.hdr_pos < HDR_SIZE {
            match stream.read(&mut partial.hdr[partial.hdr_pos..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed while reading header",
                    ))
                }
                Ok(n) => {
                    partial.hdr_pos += n;
                    continue;
                }
                Err(e) if errno::is_transient(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        if partial.parsed.is_none() {
            let header = Header::decode(&partial.hdr)?;
            partial.buf = vec![0u8; header.len as usize + 1];
            partial.parsed = Some(header);
        }

        let target_len = partial.parsed.expect("set above").len as usize;

        if partial.buf_pos < target_len {
            match stream.read(&mut partial.buf[partial.buf_pos..target_len]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed while reading payload",
                    ))
                }
                Ok(n) => {
                    partial.buf_pos += n;
                    continue;
                }
                Err(e) if errno::is_transient(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let header = partial.parsed.expect("set above");
        let mut buf = std::mem::take(&mut partial.buf);
        buf.truncate(target_len);
        *current = None;
        return Ok(Some(Msg::from_parts(header.kind, buf)));
    }
}
