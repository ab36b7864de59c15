//! Owned message buffers shuttled across the transport boundary.
//!
//! Grounded on `struct mq_msg`, `mq_wrap_buffer`, `mq_unwrap_buffer` and
//! `mq_msg_delete` in the original `mq.c`.

/// The wire's type tag. Only `Buffer` is defined today; the wire format
/// reserves the byte for future variants (e.g. an on-disk blob type), so
/// this enum is deliberately left open rather than asserted exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MsgType {
    Buffer,
}

pub(crate) const TYPE_BUFFER: u8 = 0;

impl MsgType {
    fn from_raw(raw: u8) -> Option<MsgType> {
        match raw {
            TYPE_BUFFER => Some(MsgType::Buffer),
            _ => None,
        }
    }
}

/// An owned byte buffer plus its type tag.
///
/// A `Msg` is a transient value: it is produced by [`Msg::wrap_buffer`] or
/// by a connection's receive path, and consumed by [`Endpoint::send`] or
/// [`Msg::unwrap_buffer`].
///
/// [`Endpoint::send`]: crate::Endpoint::send
#[derive(Debug)]
pub struct Msg {
    pub(crate) kind: u8,
    pub(crate) buf: Vec<u8>,
}

impl Msg {
    /// Copies `bytes` into a fresh `BUFFER` message.
    ///
    /// This never fails in the Rust core: like the rest of the ecosystem,
    /// allocation failure aborts the process rather than surfacing as a
    /// `Result`.
    pub fn wrap_buffer(bytes: &[u8]) -> Msg {
        Msg {
            kind: TYPE_BUFFER,
            buf: bytes.to_vec(),
        }
    }

    pub(crate) fn from_parts(kind: u8, buf: Vec<u8>) -> Msg {
        Msg { kind, buf }
    }

    /// The message's type tag, or `None` if the wire byte does not name a
    /// currently-known variant (the received type byte is never validated
    /// against the closed set on the wire; this is how that shows up).
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::from_raw(self.kind)
    }

    /// The payload length. Does not count the trailing convenience NUL a
    /// received message's buffer may carry.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrows the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the owned payload if this is a `BUFFER` message, consuming
    /// the wrapper. For any other type, hands the `Msg` back unchanged.
    pub fn unwrap_buffer(self) -> Result<Vec<u8>, Msg> {
        if self.kind == TYPE_BUFFER {
            Ok(self.buf)
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_unwrap_round_trips() {
        let msg = Msg::wrap_buffer(b"hello");
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.kind(), Some(MsgType::Buffer));
        assert_eq!(msg.unwrap_buffer().unwrap(), b"hello");
    }

    #[test]
    fn unwrap_on_unknown_type_leaves_msg_intact() {
        let msg = Msg::from_parts(7, vec![1, 2, 3]);
        assert_eq!(msg.kind(), None);
        let msg = msg.unwrap_buffer().unwrap_err();
        assert_eq!(msg.as_bytes(), &[1, 2, 3]);
    }
}
