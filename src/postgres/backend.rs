//! Backend message decoding.
//!
//! `ErrorResponse` and `NoticeResponse` are layered underneath every
//! phase by the connection driver and never reach these types; see
//! [`Connection::poll_recv`][crate::connection::Connection::poll_recv].
use bytes::{Buf, Bytes};

use super::{BackendProtocol, Oid, ProtocolError};
use crate::{
    common::{ByteStr, general},
    ext::{BytesExt, FmtExt},
    statement::ColumnInfo,
};

macro_rules! check_format {
    ($id:ident, $tag:ident) => {
        if $tag != $id::FORMAT {
            return Err(ProtocolError::new(general!(
                "expected {} ({:?}), found {:?}",
                stringify!($id),
                [$id::FORMAT].lossy(),
                [$tag].lossy(),
            )));
        }
    };
}

macro_rules! unit_message {
    ($(#[$doc:meta])* $id:ident, $format:literal) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $id;

        impl $id {
            pub const FORMAT: u8 = $format;
        }

        impl BackendProtocol for $id {
            fn decode(tag: u8, _: Bytes) -> Result<Self, ProtocolError> {
                check_format!($id, tag);
                Ok(Self)
            }
        }
    };
}

unit_message! {
    /// Identifies the message as a Parse-complete indicator.
    ParseComplete, b'1'
}

unit_message! {
    /// Identifies the message as a Bind-complete indicator.
    BindComplete, b'2'
}

unit_message! {
    /// Identifies the message as a Close-complete indicator.
    CloseComplete, b'3'
}

unit_message! {
    /// The statement described by `Describe` returns no rows.
    NoData, b'n'
}

unit_message! {
    /// Response to an empty query string, substituting for
    /// `CommandComplete`.
    EmptyQueryResponse, b'I'
}

unit_message! {
    /// An `Execute` row-count limit was reached; this library always
    /// executes without a limit, so receiving this is out of order.
    PortalSuspended, b's'
}

/// Identifies the message as an authentication request.
///
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html>
#[derive(Debug)]
pub enum Authentication {
    /// The authentication exchange is successfully completed.
    Ok,
    /// A clear-text password is required.
    CleartextPassword,
    /// An MD5-encrypted password is required, using the given salt.
    Md5Password { salt: [u8; 4] },
    /// SASL authentication is required; the body lists the mechanisms in
    /// the server's order of preference.
    Sasl { mechanisms: Vec<ByteStr> },
    /// SASL challenge data for the previous response.
    SaslContinue { data: Bytes },
    /// SASL outcome "additional data", completing the exchange.
    SaslFinal { data: Bytes },
    /// A method this library does not implement (Kerberos V5, GSSAPI,
    /// SSPI, ...), identified by its code.
    Unsupported(i32),
}

impl Authentication {
    pub const FORMAT: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(Authentication, tag);
        if body.remaining() < 4 {
            return Err(ProtocolError::new(general!(
                "Authentication message misses its method code"
            )));
        }
        let auth = match body.get_i32() {
            0 => Self::Ok,
            3 => Self::CleartextPassword,
            5 => {
                if body.remaining() < 4 {
                    return Err(ProtocolError::new(general!(
                        "AuthenticationMD5Password misses its salt"
                    )));
                }
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&body[..4]);
                Self::Md5Password { salt }
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.first().is_some_and(|&b| b != b'\0') {
                    let name = body.get_nul_bytestr().map_err(|err| {
                        ProtocolError::new(general!("malformed SASL mechanism list: {err}"))
                    })?;
                    mechanisms.push(name);
                }
                Self::Sasl { mechanisms }
            }
            11 => Self::SaslContinue { data: body },
            12 => Self::SaslFinal { data: body },
            code => Self::Unsupported(code),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// `CancelRequest` messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const FORMAT: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(BackendKeyData, tag);
        Ok(Self { process_id: body.get_i32(), secret_key: body.get_i32() })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const FORMAT: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(ParameterStatus, tag);
        let malformed =
            |err| ProtocolError::new(general!("malformed string in ParameterStatus: {err}"));
        Ok(Self {
            name: body.get_nul_bytestr().map_err(malformed)?,
            value: body.get_nul_bytestr().map_err(malformed)?,
        })
    }
}

/// The server does not support the minor protocol version requested by
/// the client.
///
/// Receiving this is fatal for the connection: the server cannot speak
/// protocol 3.0 in full.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server.
    pub newest_minor: i32,
    /// Protocol options not recognized by the server.
    pub unrecognized_options: Vec<ByteStr>,
}

impl NegotiateProtocolVersion {
    pub const FORMAT: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(NegotiateProtocolVersion, tag);
        let newest_minor = body.get_i32();
        let len = body.get_i32().max(0) as usize;
        let mut unrecognized_options = Vec::with_capacity(len);
        for _ in 0..len {
            let opt = body.get_nul_bytestr().map_err(|err| {
                ProtocolError::new(general!("malformed protocol option: {err}"))
            })?;
            unrecognized_options.push(opt);
        }
        Ok(Self { newest_minor, unrecognized_options })
    }
}

/// The backend is ready for a new query cycle.
///
/// Every protocol phase of this library terminates on this message; the
/// next phase does not begin before it has been observed.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current transaction status: `'I'` idle, `'T'` in a transaction
    /// block, `'E'` in a failed transaction block.
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const FORMAT: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(ReadyForQuery, tag);
        Ok(Self { tx_status: body.get_u8() })
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag, e.g. `INSERT 0 1` or `SELECT 14`.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const FORMAT: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(CommandComplete, tag);
        let tag = body
            .get_nul_bytestr()
            .map_err(|err| ProtocolError::new(general!("malformed command tag: {err}")))?;
        Ok(Self { tag })
    }
}

/// Parameter types of a described prepared statement, in parameter order.
#[derive(Debug)]
pub struct ParameterDescription {
    pub types: Vec<Oid>,
}

impl ParameterDescription {
    pub const FORMAT: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(ParameterDescription, tag);
        let len = body.get_i16().max(0) as usize;
        let mut types = Vec::with_capacity(len);
        for _ in 0..len {
            types.push(body.get_u32());
        }
        Ok(Self { types })
    }
}

/// Row shape of a described statement, in column order.
#[derive(Debug)]
pub struct RowDescription {
    pub columns: Vec<ColumnInfo>,
}

impl RowDescription {
    pub const FORMAT: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(RowDescription, tag);
        let len = body.get_i16().max(0) as usize;
        let mut columns = Vec::with_capacity(len);
        for _ in 0..len {
            let name = body
                .get_nul_bytestr()
                .map_err(|err| ProtocolError::new(general!("malformed column name: {err}")))?;
            let table_oid = body.get_u32();
            let column_id = body.get_i16();
            let type_oid = body.get_u32();
            let _type_size = body.get_i16();
            let _type_modifier = body.get_i32();
            let _format = body.get_i16();
            columns.push(ColumnInfo {
                name: name.as_str().into(),
                type_oid,
                // zero when the column is not a simple table reference
                table_oid: (table_oid != 0).then_some(table_oid),
                position_in_table: (column_id != 0).then_some(column_id),
            });
        }
        Ok(Self { columns })
    }
}

/// One result row; values are in the column order of the preceding
/// `RowDescription`.
#[derive(Debug)]
pub struct DataRow {
    /// Per-column payload; `None` is SQL NULL (wire length -1).
    pub values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const FORMAT: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        check_format!(DataRow, tag);
        let len = body.get_i16().max(0) as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let value_len = body.get_i32();
            if value_len < 0 {
                values.push(None);
                continue;
            }
            let value_len = value_len as usize;
            if body.remaining() < value_len {
                return Err(ProtocolError::new(general!(
                    "DataRow value overruns its frame"
                )));
            }
            values.push(Some(body.split_to(value_len)));
        }
        Ok(Self { values })
    }
}

/// Any backend message a protocol phase may observe.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

impl BackendMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::BindComplete(_) => "BindComplete",
            Self::CloseComplete(_) => "CloseComplete",
            Self::CommandComplete(_) => "CommandComplete",
            Self::DataRow(_) => "DataRow",
            Self::EmptyQueryResponse(_) => "EmptyQueryResponse",
            Self::NegotiateProtocolVersion(_) => "NegotiateProtocolVersion",
            Self::NoData(_) => "NoData",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ParseComplete(_) => "ParseComplete",
            Self::PortalSuspended(_) => "PortalSuspended",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::RowDescription(_) => "RowDescription",
        }
    }

    /// Build the out-of-order error for a message the current phase does
    /// not accept.
    pub fn unexpected(&self, context: &'static str) -> ProtocolError {
        ProtocolError::new(general!("unexpected {} while {context}", self.name()))
    }
}

impl BackendProtocol for BackendMessage {
    fn decode(tag: u8, body: Bytes) -> Result<Self, ProtocolError> {
        macro_rules! decode {
            ($id:ident) => {
                Self::$id($id::decode(tag, body)?)
            };
        }
        let message = match tag {
            Authentication::FORMAT => decode!(Authentication),
            BackendKeyData::FORMAT => decode!(BackendKeyData),
            BindComplete::FORMAT => decode!(BindComplete),
            CloseComplete::FORMAT => decode!(CloseComplete),
            CommandComplete::FORMAT => decode!(CommandComplete),
            DataRow::FORMAT => decode!(DataRow),
            EmptyQueryResponse::FORMAT => decode!(EmptyQueryResponse),
            NegotiateProtocolVersion::FORMAT => decode!(NegotiateProtocolVersion),
            NoData::FORMAT => decode!(NoData),
            ParameterDescription::FORMAT => decode!(ParameterDescription),
            ParameterStatus::FORMAT => decode!(ParameterStatus),
            ParseComplete::FORMAT => decode!(ParseComplete),
            PortalSuspended::FORMAT => decode!(PortalSuspended),
            ReadyForQuery::FORMAT => decode!(ReadyForQuery),
            RowDescription::FORMAT => decode!(RowDescription),
            f => {
                return Err(ProtocolError::new(general!(
                    "unsupported backend message {:?}",
                    [f].lossy()
                )));
            }
        };
        Ok(message)
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::postgres::BackendProtocol;

    #[test]
    fn data_row_null_is_distinguished() {
        let mut buf = BytesMut::new();
        buf.put_i16(2);
        buf.put_i32(-1);
        buf.put_i32(3);
        buf.put_slice(b"abc");

        let row = DataRow::decode(b'D', buf.freeze()).unwrap();
        assert!(row.values[0].is_none());
        assert_eq!(row.values[1].as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn row_description_fields() {
        let mut buf = BytesMut::new();
        buf.put_i16(1);
        buf.put_slice(b"id\0");
        buf.put_u32(16385); // table oid
        buf.put_i16(2); // attribute number
        buf.put_u32(23); // int4
        buf.put_i16(4);
        buf.put_i32(-1);
        buf.put_i16(1);

        let rd = RowDescription::decode(b'T', buf.freeze()).unwrap();
        let col = &rd.columns[0];
        assert_eq!(col.name, "id");
        assert_eq!(col.type_oid, 23);
        assert_eq!(col.table_oid, Some(16385));
        assert_eq!(col.position_in_table, Some(2));
    }

    #[test]
    fn sasl_mechanism_list() {
        let mut buf = BytesMut::new();
        buf.put_i32(10);
        buf.put_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");

        let Authentication::Sasl { mechanisms } =
            Authentication::decode(b'R', buf.freeze()).unwrap()
        else {
            panic!("expected Sasl");
        };
        assert_eq!(mechanisms.len(), 2);
        assert_eq!(mechanisms[1], *"SCRAM-SHA-256");
    }

    #[test]
    fn typed_decode_rejects_wrong_tag() {
        let err = ReadyForQuery::decode(b'1', Bytes::from_static(&[b'I']));
        assert!(err.is_err());
    }

    #[test]
    fn truncated_md5_salt_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_slice(&[1, 2]);
        assert!(Authentication::decode(b'R', buf.freeze()).is_err());

        // and a body without even a method code
        assert!(Authentication::decode(b'R', Bytes::from_static(&[0, 0])).is_err());
    }

    #[test]
    fn missing_nul_terminator_is_rejected() {
        // no terminator anywhere in the body
        let err = ParameterStatus::decode(b'S', Bytes::from_static(b"TimeZone"));
        assert!(err.is_err());

        let err = CommandComplete::decode(b'C', Bytes::from_static(b"SELECT 1"));
        assert!(err.is_err());
    }
}
