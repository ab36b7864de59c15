//! The send-path drive loop. Grounded on `flush_send` in the original
//! `mq.c`.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::TcpStream;

use crate::errno;
use crate::header::{Header, HDR_SIZE};
use crate::msg::Msg;

/// A `Msg` mid-transmission: its finalized wire header plus independent
/// cursors into the header and the payload.
pub(crate) struct PartialSend {
    msg: Msg,
    hdr: [u8; HDR_SIZE],
    hdr_pos: usize,
    buf_pos: usize,
}

impl PartialSend {
    fn new(msg: Msg) -> PartialSend {
        let hdr = Header {
            kind: msg.kind,
            len: msg.buf.len() as u64,
        }
        .encode();
        PartialSend {
            msg,
            hdr,
            hdr_pos: 0,
            buf_pos: 0,
        }
    }
}

/// Drains the send queue until it is empty or a transient condition halts
/// progress. A fatal write error is returned to the caller, which latches
/// the Endpoint into ERROR.
pub(crate) fn flush_send(
    stream: &mut TcpStream,
    queue: &mut VecDeque<Msg>,
    current: &mut Option<PartialSend>,
) -> io::Result<()> {
    loop {
        if current.is_none() {
            match queue.pop_front() {
                Some(msg) => *current = Some(PartialSend::new(msg)),
                None => return Ok(()),
            }
        }

        let partial = current.as_mut().expect("just populated above");

        if partial.hdr_pos < HDR_SIZE {
            match stream.write(&partial.hdr[partial.hdr_pos..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer closed while writing header",
                    ))
                }
                Ok(n) => {
                    partial.hdr_pos += n;
                    continue;
                }
                Err(e) if errno::is_transient(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        if partial.buf_pos < partial.msg.buf.len() {
            match stream.write(&partial.msg.buf[partial.buf_pos..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer closed while writing payload",
                    ))
                }
                Ok(n) => {
                    partial.buf_pos += n;
                    continue;
                }
                Err(e) if errno::is_transient(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        *current = None;
    }
}
