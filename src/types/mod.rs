//! The type catalogue: postgres oids, the [`PgValue`] variant, and the
//! binary codecs between them.
//!
//! Encoding is centralized here; the protocol layer only ever sees
//! `(oid, payload bytes)` pairs. Binding coerces a value to the oid the
//! statement declared for that parameter, widening where safe (an `i32`
//! binds to an `int8` column) and failing with [`UnsupportedType`]
//! otherwise. Decoding an oid outside the catalogue falls back to the
//! raw payload with a logged warning so rows are never dropped.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use time::PrimitiveDateTime;

pub mod oid;

mod array;
mod json;
mod numeric;
mod timestamp;

pub use crate::postgres::Oid;
pub use json::Json;

/// A postgres value, decoded from or bound to a query.
///
/// [`Null`][PgValue::Null] is a distinguished value, not an absent one.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Arbitrary-precision `numeric` as its decimal string; never a
    /// host float, so no precision is lost.
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    /// `timestamp` / `timestamptz`, microsecond precision, UTC.
    Timestamp(PrimitiveDateTime),
    Json(serde_json::Value),
    /// One-dimensional array of non-null elements.
    Array(Vec<PgValue>),
    /// Fallback for an oid outside the catalogue: the unparsed payload.
    Raw { oid: Oid, bytes: Bytes },
}

impl PgValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Name of the variant, for diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            PgValue::Null => "null",
            PgValue::Bool(_) => "bool",
            PgValue::Int2(_) => "int2",
            PgValue::Int4(_) => "int4",
            PgValue::Int8(_) => "int8",
            PgValue::Float4(_) => "float4",
            PgValue::Float8(_) => "float8",
            PgValue::Numeric(_) => "numeric",
            PgValue::Text(_) => "text",
            PgValue::Bytea(_) => "bytea",
            PgValue::Timestamp(_) => "timestamp",
            PgValue::Json(_) => "json",
            PgValue::Array(_) => "array",
            PgValue::Raw { .. } => "raw",
        }
    }

    /// Text accessor, `None` for other variants.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PgValue::Text(s) | PgValue::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Widening integer accessor for the three integer variants.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PgValue::Int2(v) => Some(*v as i64),
            PgValue::Int4(v) => Some(*v as i64),
            PgValue::Int8(v) => Some(*v),
            _ => None,
        }
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for PgValue {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<bool>v => Self::Bool(v));
from!(<i16>v => Self::Int2(v));
from!(<i32>v => Self::Int4(v));
from!(<i64>v => Self::Int8(v));
from!(<f32>v => Self::Float4(v));
from!(<f64>v => Self::Float8(v));
from!(<&str>v => Self::Text(v.into()));
from!(<String>v => Self::Text(v));
from!(<Vec<u8>>v => Self::Bytea(v));
from!(<&[u8]>v => Self::Bytea(v.into()));
from!(<PrimitiveDateTime>v => Self::Timestamp(v));
from!(<serde_json::Value>v => Self::Json(v));

impl<T: Into<PgValue>> From<Option<T>> for PgValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

// `Vec<u8>` stays bytea, so arrays get explicit element impls
macro_rules! from_vec {
    ($($ty:ty),* $(,)?) => {$(
        impl From<Vec<$ty>> for PgValue {
            fn from(value: Vec<$ty>) -> Self {
                PgValue::array(value)
            }
        }
    )*};
}

from_vec!(bool, i16, i32, i64, f32, f64, &str, String, PrimitiveDateTime);

impl PgValue {
    /// Collect values into a one-dimensional [`PgValue::Array`].
    pub fn array<T: Into<PgValue>>(values: impl IntoIterator<Item = T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

/// A bind-time type mapping failure.
///
/// Raised synchronously when a parameter cannot be coerced to the oid
/// the statement declared; never silent.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct UnsupportedType {
    reason: String,
}

impl UnsupportedType {
    pub(crate) fn cannot_bind(kind: &'static str, target: Oid) -> Self {
        Self {
            reason: format!(
                "cannot bind {kind} value as {} (oid {target})",
                oid::type_name(target),
            ),
        }
    }

    pub(crate) fn invalid_numeric(text: &str) -> Self {
        let text: String = text.chars().take(32).collect();
        Self { reason: format!("invalid numeric literal {text:?}") }
    }

    pub(crate) fn out_of_range(what: &'static str) -> Self {
        Self { reason: format!("{what} value out of range") }
    }

    pub(crate) fn new(reason: String) -> Self {
        Self { reason }
    }
}

impl std::fmt::Debug for UnsupportedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// An error decoding a wire value.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct DecodeError {
    reason: String,
}

impl DecodeError {
    pub(crate) fn new(reason: String) -> Self {
        Self { reason }
    }

    pub(crate) fn length(what: &'static str, expected: usize, got: usize) -> Self {
        Self { reason: format!("{what} expects {expected} bytes, got {got}") }
    }
}

impl std::fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self { reason: format!("non UTF-8 text value: {err}") }
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        err.utf8_error().into()
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self { reason: format!("malformed json value: {err}") }
    }
}

/// Encode `value` as the binary payload of a parameter declared `target`.
///
/// The payload is appended to `buf` without a length prefix; NULL is the
/// caller's business (wire length -1, no payload).
pub(crate) fn encode(
    value: &PgValue,
    target: Oid,
    buf: &mut BytesMut,
) -> Result<(), UnsupportedType> {
    use PgValue::*;

    // unknown-oid round trips: a raw value binds back to its own type
    if let Raw { oid, bytes } = value {
        if *oid == target {
            buf.put_slice(bytes);
            return Ok(());
        }
        return Err(UnsupportedType::cannot_bind("raw", target));
    }

    match target {
        oid::BOOL => match value {
            Bool(v) => buf.put_u8(*v as u8),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::INT2 => match value {
            Int2(v) => buf.put_i16(*v),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::INT4 => match value {
            Int2(v) => buf.put_i32(*v as i32),
            Int4(v) => buf.put_i32(*v),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        // integers widen into int8
        oid::INT8 => match value {
            Int2(v) => buf.put_i64(*v as i64),
            Int4(v) => buf.put_i64(*v as i64),
            Int8(v) => buf.put_i64(*v),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::OID | oid::REGPROC => match value.as_int() {
            Some(v) => match u32::try_from(v) {
                Ok(v) => buf.put_u32(v),
                Err(_) => return Err(UnsupportedType::out_of_range("oid")),
            },
            None => return Err(UnsupportedType::cannot_bind(value.kind(), target)),
        },
        oid::FLOAT4 => match value {
            Float4(v) => buf.put_slice(&v.to_be_bytes()),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::FLOAT8 => match value {
            Float4(v) => buf.put_slice(&(*v as f64).to_be_bytes()),
            Float8(v) => buf.put_slice(&v.to_be_bytes()),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::NUMERIC => match value {
            Numeric(text) => numeric::encode(text, buf)?,
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::CHAR | oid::NAME => match value {
            Text(v) => buf.put_slice(v.as_bytes()),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::BYTEA => match value {
            Bytea(v) => buf.put_slice(v),
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        oid::TIMESTAMP | oid::TIMESTAMPTZ => match value {
            Timestamp(v) => timestamp::encode(*v, buf)?,
            v => return Err(UnsupportedType::cannot_bind(v.kind(), target)),
        },
        // any value binds to json through its JSON rendering
        oid::JSON => json::write(value, buf)?,
        oid::JSONB => {
            buf.put_u8(json::JSONB_VERSION);
            json::write(value, buf)?;
        }
        _ => match (oid::element_oid(target), value) {
            (Some(elem), Array(values)) => array::encode(values, elem, buf)?,
            _ => return Err(UnsupportedType::cannot_bind(value.kind(), target)),
        },
    }

    Ok(())
}

/// Decode the binary payload of a column declared `type_oid`.
pub(crate) fn decode(type_oid: Oid, mut body: Bytes) -> Result<PgValue, DecodeError> {
    let value = match type_oid {
        oid::BOOL => {
            if body.remaining() != 1 {
                return Err(DecodeError::length("bool", 1, body.remaining()));
            }
            PgValue::Bool(body.get_u8() != 0)
        }
        oid::INT2 => {
            if body.remaining() != 2 {
                return Err(DecodeError::length("int2", 2, body.remaining()));
            }
            PgValue::Int2(body.get_i16())
        }
        oid::INT4 => {
            if body.remaining() != 4 {
                return Err(DecodeError::length("int4", 4, body.remaining()));
            }
            PgValue::Int4(body.get_i32())
        }
        oid::INT8 => {
            if body.remaining() != 8 {
                return Err(DecodeError::length("int8", 8, body.remaining()));
            }
            PgValue::Int8(body.get_i64())
        }
        oid::OID | oid::REGPROC => {
            if body.remaining() != 4 {
                return Err(DecodeError::length("oid", 4, body.remaining()));
            }
            PgValue::Int8(body.get_u32() as i64)
        }
        oid::FLOAT4 => {
            if body.remaining() != 4 {
                return Err(DecodeError::length("float4", 4, body.remaining()));
            }
            PgValue::Float4(f32::from_bits(body.get_u32()))
        }
        oid::FLOAT8 => {
            if body.remaining() != 8 {
                return Err(DecodeError::length("float8", 8, body.remaining()));
            }
            PgValue::Float8(f64::from_bits(body.get_u64()))
        }
        oid::NUMERIC => PgValue::Numeric(numeric::decode(body)?),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::CHAR | oid::NAME => {
            PgValue::Text(String::from_utf8(body.to_vec())?)
        }
        oid::BYTEA => PgValue::Bytea(body.to_vec()),
        oid::TIMESTAMP | oid::TIMESTAMPTZ => PgValue::Timestamp(timestamp::decode(body)?),
        oid::JSON => PgValue::Json(serde_json::from_slice(&body)?),
        oid::JSONB => {
            if body.first() != Some(&json::JSONB_VERSION) {
                return Err(DecodeError::new("unsupported jsonb version".into()));
            }
            body.advance(1);
            PgValue::Json(serde_json::from_slice(&body)?)
        }
        oid::VOID => PgValue::Null,
        _ => match oid::element_oid(type_oid) {
            Some(elem) => array::decode(body, elem)?,
            // keep the row instead of dropping it
            None => {
                tracing::warn!(
                    oid = type_oid,
                    "no decoder for type oid, returning raw bytes",
                );
                PgValue::Raw { oid: type_oid, bytes: body }
            }
        },
    };
    Ok(value)
}

#[cfg(test)]
mod test {
    use bytes::{Bytes, BytesMut};
    use time::macros::datetime;

    use super::{PgValue, decode, encode, oid};

    fn roundtrip(value: PgValue, target: super::Oid) -> PgValue {
        let mut buf = BytesMut::new();
        encode(&value, target, &mut buf).unwrap();
        decode(target, buf.freeze()).unwrap()
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(PgValue::Bool(true), oid::BOOL), PgValue::Bool(true));
        assert_eq!(roundtrip(PgValue::Int2(-42), oid::INT2), PgValue::Int2(-42));
        assert_eq!(roundtrip(PgValue::Int4(i32::MIN), oid::INT4), PgValue::Int4(i32::MIN));
        assert_eq!(roundtrip(PgValue::Int8(i64::MAX), oid::INT8), PgValue::Int8(i64::MAX));
        assert_eq!(
            roundtrip(PgValue::Text("höhe".into()), oid::TEXT),
            PgValue::Text("höhe".into()),
        );
        assert_eq!(
            roundtrip(PgValue::Bytea(vec![0, 159, 146, 150]), oid::BYTEA),
            PgValue::Bytea(vec![0, 159, 146, 150]),
        );
        let dt = datetime!(2021-06-01 12:00:00.000042);
        assert_eq!(roundtrip(PgValue::Timestamp(dt), oid::TIMESTAMPTZ), PgValue::Timestamp(dt));
    }

    #[test]
    fn float_edge_cases_are_bit_exact() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0f64, f64::MIN, f64::EPSILON] {
            let PgValue::Float8(back) = roundtrip(PgValue::Float8(v), oid::FLOAT8) else {
                panic!("expected float8");
            };
            assert_eq!(back.to_bits(), v.to_bits());
        }
        for v in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, -0.0f32] {
            let PgValue::Float4(back) = roundtrip(PgValue::Float4(v), oid::FLOAT4) else {
                panic!("expected float4");
            };
            assert_eq!(back.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn integers_widen() {
        assert_eq!(roundtrip(PgValue::Int2(7), oid::INT8), PgValue::Int8(7));
        assert_eq!(roundtrip(PgValue::Int4(7), oid::INT8), PgValue::Int8(7));
        assert_eq!(roundtrip(PgValue::Int2(7), oid::INT4), PgValue::Int4(7));
        assert_eq!(roundtrip(PgValue::Float4(0.5), oid::FLOAT8), PgValue::Float8(0.5));
    }

    #[test]
    fn narrowing_is_refused() {
        let mut buf = BytesMut::new();
        assert!(encode(&PgValue::Int8(1), oid::INT4, &mut buf).is_err());
        assert!(encode(&PgValue::Int4(1), oid::INT2, &mut buf).is_err());
        assert!(encode(&PgValue::Float8(1.0), oid::FLOAT4, &mut buf).is_err());
        assert!(encode(&PgValue::Text("x".into()), oid::INT4, &mut buf).is_err());
    }

    #[test]
    fn jsonb_version_prefix() {
        let value = PgValue::Json(serde_json::json!({"a": [1, 2]}));
        let mut buf = BytesMut::new();
        encode(&value, oid::JSONB, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(decode(oid::JSONB, buf.freeze()).unwrap(), value);

        // json has no version byte
        let mut buf = BytesMut::new();
        encode(&value, oid::JSON, &mut buf).unwrap();
        assert_eq!(buf[0], b'{');
    }

    #[test]
    fn unknown_oid_falls_back_to_raw() {
        let body = Bytes::from_static(b"\x01\x02");
        let value = decode(9_999_999, body.clone()).unwrap();
        assert_eq!(value, PgValue::Raw { oid: 9_999_999, bytes: body.clone() });

        // and binds back to the same oid only
        let mut buf = BytesMut::new();
        encode(&value, 9_999_999, &mut buf).unwrap();
        assert_eq!(&buf[..], &body[..]);
        assert!(encode(&value, oid::BYTEA, &mut BytesMut::new()).is_err());
    }

    #[test]
    fn oid_values() {
        assert_eq!(roundtrip(PgValue::Int4(23), oid::OID), PgValue::Int8(23));
        let mut buf = BytesMut::new();
        assert!(encode(&PgValue::Int8(-1), oid::OID, &mut buf).is_err());
    }
}
