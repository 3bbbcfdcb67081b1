//! PostgreSQL frontend/backend protocol v3.0.
//!
//! All communication is through a stream of messages.
//!
//! 1. The first byte of a message identifies the message type
//! 2. The next four bytes specify the length of the rest of the message
//!
//! (this length count includes itself, but not the message-type byte).
//!
//! <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-MESSAGE-CONCEPTS>
use bytes::{Buf, Bytes, BytesMut};

pub mod backend;
pub mod frontend;
pub mod sqlstate;

mod error;
pub(crate) mod sasl;

pub use error::{DatabaseError, ProtocolError};

/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Parameter and result column wire format.
///
/// This library always transfers values in binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    Text,
    #[default]
    Binary,
}

impl WireFormat {
    /// Format code as transferred in `Bind` and `RowDescription`.
    pub const fn code(self) -> i16 {
        match self {
            WireFormat::Text => 0,
            WireFormat::Binary => 1,
        }
    }
}

/// Message that can be written into the frontend write buffer.
///
/// For historical reasons, the very first messages sent by the client
/// (`StartupMessage`, `SSLRequest` and `CancelRequest`) have no
/// message-type byte and do not implement this trait.
pub trait FrontendProtocol {
    /// Encode a complete frame, tag and length included.
    fn encode(self, buf: &mut BytesMut);
}

/// Message that can be decoded from a backend frame.
pub trait BackendProtocol: Sized {
    /// Decode from a `(type, payload)` frame.
    ///
    /// Returns a [`ProtocolError`] when `tag` does not match the
    /// expected message, which means the backend replied out of order.
    fn decode(tag: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Split one `(type, payload)` frame off the read buffer.
///
/// A message needs at least 5 bytes (type + length). When fewer bytes, or
/// less than the advertised body, are buffered, the fragment is left in
/// `buf` as leftover and `None` is returned so the caller reads more;
/// frames larger than one socket read coalesce across reads without loss.
/// Trailing bytes of a read stay buffered for subsequent calls.
pub(crate) fn next_frame(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    // type + len
    const HEADER: usize = 1 + 4;

    let Some(mut header) = buf.get(..HEADER) else {
        return Ok(None);
    };

    let tag = header.get_u8();
    let len = header.get_i32();

    let Some(body_len) = len.checked_sub(4).and_then(|v| usize::try_from(v).ok()) else {
        return Err(ProtocolError::new(crate::common::general!(
            "invalid message length {len} for message {:?}",
            crate::ext::LossyFmt(&[tag]),
        )));
    };

    if buf.len() < HEADER + body_len {
        buf.reserve(HEADER + body_len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER);
    Ok(Some((tag, buf.split_to(body_len).freeze())))
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::next_frame;

    #[test]
    fn frame_reassembly_across_reads() {
        let mut buf = BytesMut::new();

        // fewer than 5 bytes: retained as leftover
        buf.put_u8(b'Z');
        buf.put_slice(&[0, 0]);
        assert!(next_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        // header complete, body still short
        buf.put_slice(&[0, 9]);
        buf.put_slice(&[1, 2]);
        assert!(next_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        // body completes, trailing bytes of the same read survive
        buf.put_slice(&[3, 4, 5]);
        buf.put_u8(b'C');
        let (tag, body) = next_frame(&mut buf).unwrap().unwrap();
        assert_eq!(tag, b'Z');
        assert_eq!(&body[..], &[1, 2, 3, 4, 5]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn frame_rejects_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Z');
        buf.put_i32(-1);
        assert!(next_frame(&mut buf).is_err());
    }
}
