//! Frontend message builders.
//!
//! Every builder emits one fully formed frame into the shared write
//! buffer: message type, `Int32` length (including itself, excluding the
//! type byte), payload. `Startup`, [`ssl_request`] and [`cancel_frame`]
//! are the three untagged frames and do not implement
//! [`FrontendProtocol`].
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, Bytes, BytesMut};

use super::{FrontendProtocol, Oid, WireFormat};
use crate::ext::{BufMutExt, UsizeExt};

/// The protocol version number: major 3, minor 0.
pub const PROTOCOL_VERSION: i32 = 196608;

/// The magic code of the `CancelRequest` frame.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// The magic code of the `SSLRequest` frame.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Write the frame length at the reserved 4 bytes starting at `offset`.
///
/// The length counts everything from `offset` to the end of the buffer,
/// which excludes the message-type byte by construction.
fn write_len(buf: &mut BytesMut, offset: usize) {
    let len = (buf.len() - offset).to_i32();
    buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
}

/// Postgres Startup frontend message.
///
/// The protocol version number is followed by pairs of parameter name and
/// value strings, terminated by a zero byte.
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
}

impl Startup<'_> {
    pub fn encode(self, buf: &mut BytesMut) {
        let offset = buf.len();
        // reserve 4 bytes for length
        buf.put_u32(0);
        buf.put_i32(PROTOCOL_VERSION);

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        // terminator after the last name/value pair
        buf.put_u8(0);

        write_len(buf, offset);
    }
}

/// The `SSLRequest` frame sent before the startup message.
///
/// The server replies a single byte: `'S'` to proceed with the TLS
/// handshake on the same socket, `'N'` to refuse.
pub fn ssl_request() -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[..4].copy_from_slice(&8i32.to_be_bytes());
    frame[4..].copy_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    frame
}

/// Prebuild a `CancelRequest` frame from `BackendKeyData`.
///
/// The frame is written on a fresh connection, out of band from the
/// cancelled query.
pub fn cancel_frame(process_id: i32, secret_key: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_i32(16);
    buf.put_i32(CANCEL_REQUEST_CODE);
    buf.put_i32(process_id);
    buf.put_i32(secret_key);
    buf.freeze()
}

/// Identifies the message as a password response.
///
/// Used for both cleartext and MD5 responses; the server knows which it
/// requested.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password, encrypted if requested.
    pub password: &'a str,
}

impl PasswordMessage<'_> {
    pub const FORMAT: u8 = b'p';
}

impl FrontendProtocol for PasswordMessage<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_nul_string(self.password);
        write_len(buf, offset);
    }
}

/// Initial SASL response, selecting the authentication mechanism.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    /// Name of the selected SASL authentication mechanism.
    pub mechanism: &'a str,
    /// SASL mechanism specific "Initial Client Response".
    pub response: &'a [u8],
}

impl SaslInitialResponse<'_> {
    pub const FORMAT: u8 = b'p';
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_nul_string(self.mechanism);
        buf.put_i32(self.response.len().to_i32());
        buf.put_slice(self.response);
        write_len(buf, offset);
    }
}

/// SASL challenge response data.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    pub data: &'a [u8],
}

impl SaslResponse<'_> {
    pub const FORMAT: u8 = b'p';
}

impl FrontendProtocol for SaslResponse<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_slice(self.data);
        write_len(buf, offset);
    }
}

/// Identifies the message as a simple query.
#[derive(Debug)]
pub struct Query<'a> {
    /// The query string itself.
    pub sql: &'a str,
}

impl Query<'_> {
    pub const FORMAT: u8 = b'Q';
}

impl FrontendProtocol for Query<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_nul_string(self.sql);
        write_len(buf, offset);
    }
}

/// Identifies the message as a Parse command.
#[derive(Debug)]
pub struct Parse<'a, I> {
    /// Prepared statement name; an empty string selects the unnamed
    /// prepared statement.
    pub statement: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// The number of parameter data types specified (can be zero).
    ///
    /// Note that this is not an indication of the number of parameters
    /// that might appear in the query string, only the number that the
    /// frontend wants to prespecify types for.
    pub param_types_len: i16,
    /// Object ID of each parameter data type. Zero leaves the type
    /// unspecified.
    pub param_types: I,
}

impl<I> Parse<'_, I> {
    pub const FORMAT: u8 = b'P';
}

impl<I> FrontendProtocol for Parse<'_, I>
where
    I: IntoIterator<Item = Oid>,
{
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_nul_string(self.statement);
        buf.put_nul_string(self.sql);
        buf.put_i16(self.param_types_len);
        for oid in self.param_types {
            buf.put_u32(oid);
        }
        write_len(buf, offset);
    }
}

/// Identifies the message as a Describe command.
#[derive(Debug)]
pub struct Describe<'a> {
    /// `'S'` to describe a prepared statement or `'P'` to describe a
    /// portal.
    pub kind: u8,
    /// The name of the prepared statement or portal.
    pub name: &'a str,
}

impl Describe<'_> {
    pub const FORMAT: u8 = b'D';
}

impl FrontendProtocol for Describe<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
        write_len(buf, offset);
    }
}

/// Identifies the message as a Bind command.
///
/// Parameter payloads arrive here already encoded by the type system;
/// `None` binds SQL NULL, written as length -1 with no value bytes.
/// Parameter and result formats are always binary.
#[derive(Debug)]
pub struct Bind<'a> {
    /// The name of the destination portal; an empty string selects the
    /// unnamed portal.
    pub portal: &'a str,
    /// The name of the source prepared statement.
    pub statement: &'a str,
    /// One pre-encoded payload per parameter.
    pub params: &'a [Option<Bytes>],
}

impl Bind<'_> {
    pub const FORMAT: u8 = b'B';
}

impl FrontendProtocol for Bind<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);

        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.statement);

        // one format code applied to all parameters
        buf.put_i16(1);
        buf.put_i16(WireFormat::Binary.code());

        buf.put_i16(self.params.len().to_i16());
        for param in self.params {
            match param {
                Some(value) => {
                    buf.put_i32(value.len().to_i32());
                    buf.put_slice(value);
                }
                None => buf.put_i32(-1),
            }
        }

        // one format code applied to all result columns
        buf.put_i16(1);
        buf.put_i16(WireFormat::Binary.code());

        write_len(buf, offset);
    }
}

/// Identifies the message as an Execute command.
#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute.
    pub portal: &'a str,
    /// Maximum number of rows to return. Zero denotes "no limit".
    pub max_rows: i32,
}

impl Execute<'_> {
    pub const FORMAT: u8 = b'E';
}

impl FrontendProtocol for Execute<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_nul_string(self.portal);
        buf.put_i32(self.max_rows);
        write_len(buf, offset);
    }
}

/// Identifies the message as a Close command.
#[derive(Debug)]
pub struct Close<'a> {
    /// `'S'` to close a prepared statement or `'P'` to close a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal.
    pub name: &'a str,
}

impl Close<'_> {
    pub const FORMAT: u8 = b'C';
}

impl FrontendProtocol for Close<'_> {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        let offset = buf.len();
        buf.put_u32(0);
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
        write_len(buf, offset);
    }
}

/// Identifies the message as a Sync command.
#[derive(Debug)]
pub struct Sync;

impl Sync {
    pub const FORMAT: u8 = b'S';
}

impl FrontendProtocol for Sync {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        buf.put_i32(4);
    }
}

/// Identifies the message as a termination notice.
#[derive(Debug)]
pub struct Terminate;

impl Terminate {
    pub const FORMAT: u8 = b'X';
}

impl FrontendProtocol for Terminate {
    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(Self::FORMAT);
        buf.put_i32(4);
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;
    use crate::postgres::FrontendProtocol;

    #[test]
    fn sync_frame() {
        let mut buf = BytesMut::new();
        Sync.encode(&mut buf);
        assert_eq!(&buf[..], &[b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn cancel_request_frame() {
        let frame = cancel_frame(0x0102_0304, 0x1122_3344);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..4], &16i32.to_be_bytes());
        assert_eq!(&frame[4..8], &CANCEL_REQUEST_CODE.to_be_bytes());
        assert_eq!(&frame[8..12], &[1, 2, 3, 4]);
        assert_eq!(&frame[12..], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn ssl_request_frame() {
        let frame = ssl_request();
        assert_eq!(&frame[..4], &8i32.to_be_bytes());
        assert_eq!(&frame[4..], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn startup_frame() {
        let mut buf = BytesMut::new();
        Startup { user: "alice", database: Some("db") }.encode(&mut buf);

        // length covers the whole untagged frame
        assert_eq!(&buf[..4], &(buf.len() as i32).to_be_bytes());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0alice\0database\0db\0\0");
    }

    #[test]
    fn query_frame() {
        let mut buf = BytesMut::new();
        Query { sql: "begin" }.encode(&mut buf);
        assert_eq!(buf[0], b'Q');
        assert_eq!(&buf[1..5], &10i32.to_be_bytes());
        assert_eq!(&buf[5..], b"begin\0");
    }

    #[test]
    fn bind_null_and_value() {
        let params = [Some(bytes::Bytes::from_static(&[0, 0, 0, 7])), None];
        let mut buf = BytesMut::new();
        Bind { portal: "", statement: "s1", params: &params }.encode(&mut buf);

        assert_eq!(buf[0], b'B');
        let body = &buf[5..];
        // portal "" + statement "s1"
        assert_eq!(&body[..4], b"\0s1\0");
        // one format code, binary
        assert_eq!(&body[4..8], &[0, 1, 0, 1]);
        // two parameters: 4-byte value then NULL
        assert_eq!(&body[8..10], &[0, 2]);
        assert_eq!(&body[10..14], &4i32.to_be_bytes());
        assert_eq!(&body[14..18], &[0, 0, 0, 7]);
        assert_eq!(&body[18..22], &(-1i32).to_be_bytes());
        // one result format code, binary
        assert_eq!(&body[22..], &[0, 1, 0, 1]);
    }
}
