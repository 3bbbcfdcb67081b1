use bytes::{Buf, Bytes};
use std::borrow::Cow;

use super::sqlstate;
use crate::{common::general, ext::BytesExt};

/// Unexpected message order or malformed frame.
///
/// This error is terminal for the connection: the stream can no longer be
/// trusted and the pool destroys the connection.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct ProtocolError {
    reason: Cow<'static, str>,
}

impl ProtocolError {
    pub(crate) fn new(reason: Cow<'static, str>) -> Self {
        Self { reason }
    }
}

impl std::fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Error reported by the backend via `ErrorResponse`.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order, and
/// unrecognized field types are silently ignored.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
///
/// An `ErrorResponse` fails the current phase but does not poison the
/// connection: once the ensuing `ReadyForQuery` has been drained the
/// connection is reusable.
#[derive(Debug, Default, thiserror::Error)]
#[error("{severity}: {message} ({code})")]
pub struct DatabaseError {
    /// Severity as a non-localized token: `ERROR`, `FATAL` or `PANIC`.
    pub severity: String,
    /// Severity in the localized translation of the server.
    pub severity_localized: String,
    /// The SQLSTATE code, always five characters.
    pub code: String,
    /// The primary human-readable error message.
    pub message: String,
    /// Optional secondary message with more detail.
    pub detail: Option<String>,
    /// Optional suggestion what to do about the problem.
    pub hint: Option<String>,
    /// Error cursor position as an index into the original query string.
    pub position: Option<u32>,
    /// Cursor position into the internally generated command.
    pub internal_position: Option<u32>,
    /// Text of a failed internally-generated command.
    pub internal_query: Option<String>,
    /// Call stack context in which the error occurred.
    pub where_context: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub data_type_name: Option<String>,
    pub constraint_name: Option<String>,
    /// Source-code file name where the error was reported.
    pub file: Option<String>,
    /// Source-code line number where the error was reported.
    pub line: Option<u32>,
    /// Source-code routine reporting the error.
    pub routine: Option<String>,
}

impl DatabaseError {
    pub(crate) fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut me = Self::default();

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::new(general!(
                    "missing terminator in ErrorResponse fields"
                )));
            }
            let field = body.get_u8();
            if field == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr().map_err(|err| {
                ProtocolError::new(general!("malformed field string in ErrorResponse: {err}"))
            })?;
            let value = value.as_str();
            match field {
                b'V' => me.severity = value.into(),
                b'S' => me.severity_localized = value.into(),
                b'C' => me.code = value.into(),
                b'M' => me.message = value.into(),
                b'D' => me.detail = Some(value.into()),
                b'H' => me.hint = Some(value.into()),
                b'P' => me.position = value.parse().ok(),
                b'p' => me.internal_position = value.parse().ok(),
                b'q' => me.internal_query = Some(value.into()),
                b'W' => me.where_context = Some(value.into()),
                b's' => me.schema_name = Some(value.into()),
                b't' => me.table_name = Some(value.into()),
                b'c' => me.column_name = Some(value.into()),
                b'd' => me.data_type_name = Some(value.into()),
                b'n' => me.constraint_name = Some(value.into()),
                b'F' => me.file = Some(value.into()),
                b'L' => me.line = value.parse().ok(),
                b'R' => me.routine = Some(value.into()),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        // pre-9.6 servers do not send the non-localized severity
        if me.severity.is_empty() {
            me.severity = me.severity_localized.clone();
        }

        Ok(me)
    }

    /// The SQLSTATE class, the first two characters of [`code`][Self::code].
    ///
    /// Callers classify errors by class: `08` connection, `22` data
    /// exception, `23` constraint violation, `40` transaction rollback,
    /// `42` syntax or access.
    pub fn code_class(&self) -> &str {
        self.code.get(..2).unwrap_or("")
    }

    /// Whether this is `57014 query_canceled`.
    pub fn is_query_cancelled(&self) -> bool {
        self.code == sqlstate::QUERY_CANCELED
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::DatabaseError;
    use crate::postgres::sqlstate;

    fn response(fields: &[(u8, &str)]) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        for (field, value) in fields {
            buf.put_u8(*field);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
        buf.freeze()
    }

    #[test]
    fn parse_all_fields() {
        let err = DatabaseError::parse(response(&[
            (b'S', "FEHLER"),
            (b'V', "ERROR"),
            (b'C', "23505"),
            (b'M', "duplicate key"),
            (b'D', "Key (id)=(1) already exists."),
            (b'n', "t_pkey"),
            (b'P', "15"),
            (b'L', "434"),
            (b'Z', "future field, ignored"),
        ]))
        .unwrap();

        assert_eq!(err.severity, "ERROR");
        assert_eq!(err.severity_localized, "FEHLER");
        assert_eq!(err.code, "23505");
        assert_eq!(err.code_class(), "23");
        assert_eq!(err.position, Some(15));
        assert_eq!(err.line, Some(434));
        assert_eq!(err.constraint_name.as_deref(), Some("t_pkey"));
        assert!(!err.is_query_cancelled());
    }

    #[test]
    fn cancelled_code() {
        let err =
            DatabaseError::parse(response(&[(b'V', "ERROR"), (b'C', sqlstate::QUERY_CANCELED)]))
                .unwrap();
        assert!(err.is_query_cancelled());
        assert_eq!(err.code_class(), "57");
    }

    #[test]
    fn severity_falls_back_to_localized() {
        let err = DatabaseError::parse(response(&[(b'S', "ERROR"), (b'C', "42601")])).unwrap();
        assert_eq!(err.severity, "ERROR");
    }

    #[test]
    fn unterminated_field_is_rejected() {
        // field code followed by a value that never terminates
        let mut buf = BytesMut::new();
        buf.put_u8(b'M');
        buf.put_slice(b"truncated mid-frame");
        assert!(DatabaseError::parse(buf.freeze()).is_err());
    }
}
