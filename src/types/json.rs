//! `json` / `jsonb` support.
//!
//! `json` is plain UTF-8 JSON text; `jsonb` carries a single leading
//! version byte on the wire, on both read and write.
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{PgValue, UnsupportedType, timestamp};

/// The only `jsonb` wire version in existence.
pub(crate) const JSONB_VERSION: u8 = 1;

/// Render any bindable value as JSON text into `buf`.
///
/// Scalars map to their JSON counterparts; `numeric` strings stay
/// strings so no precision is lost, byte buffers render as base64
/// strings and instants as ISO-8601 strings. Only the raw fallback has
/// no JSON rendering.
pub(crate) fn write(value: &PgValue, buf: &mut BytesMut) -> Result<(), UnsupportedType> {
    let json = to_json(value)?;
    serde_json::to_writer(buf.writer(), &json)
        .expect("serializing serde_json::Value is infallible");
    Ok(())
}

fn to_json(value: &PgValue) -> Result<serde_json::Value, UnsupportedType> {
    use serde_json::Value;

    let json = match value {
        PgValue::Json(v) => v.clone(),
        PgValue::Null => Value::Null,
        PgValue::Bool(v) => Value::Bool(*v),
        PgValue::Int2(v) => Value::from(*v),
        PgValue::Int4(v) => Value::from(*v),
        PgValue::Int8(v) => Value::from(*v),
        PgValue::Float4(v) => Value::from(*v as f64),
        PgValue::Float8(v) => Value::from(*v),
        PgValue::Numeric(v) | PgValue::Text(v) => Value::from(v.as_str()),
        PgValue::Bytea(v) => Value::from(BASE64.encode(v)),
        PgValue::Timestamp(v) => Value::from(timestamp::iso8601(*v)),
        PgValue::Array(values) => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                out.push(to_json(v)?);
            }
            Value::Array(out)
        }
        v @ PgValue::Raw { .. } => {
            return Err(UnsupportedType::cannot_bind(v.kind(), super::oid::JSON));
        }
    };
    Ok(json)
}

/// Bind any [`Serialize`] value as `json`/`jsonb`.
///
/// # Panics
///
/// Converting panics when the [`Serialize`] implementation decides to
/// fail.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T: Serialize> From<Json<T>> for PgValue {
    fn from(value: Json<T>) -> Self {
        PgValue::Json(serde_json::to_value(&value.0).unwrap())
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::Json;
    use crate::types::PgValue;

    #[test]
    fn scalars_render_as_json() {
        let mut buf = BytesMut::new();
        super::write(&PgValue::Int4(7), &mut buf).unwrap();
        assert_eq!(&buf[..], b"7");

        let mut buf = BytesMut::new();
        super::write(&PgValue::array(vec!["a", "b"]), &mut buf).unwrap();
        assert_eq!(&buf[..], br#"["a","b"]"#);
    }

    #[test]
    fn non_finite_floats_become_json_null() {
        let mut buf = BytesMut::new();
        super::write(&PgValue::Float8(f64::NAN), &mut buf).unwrap();
        assert_eq!(&buf[..], b"null");
    }

    #[test]
    fn serialize_wrapper() {
        #[derive(serde::Serialize)]
        struct Payload {
            id: i32,
        }
        let value: PgValue = Json(Payload { id: 3 }).into();
        assert_eq!(value, PgValue::Json(serde_json::json!({"id": 3})));
    }

    #[test]
    fn bytea_renders_as_base64() {
        let mut buf = BytesMut::new();
        super::write(&PgValue::Bytea(vec![1, 2, 3]), &mut buf).unwrap();
        assert_eq!(&buf[..], br#""AQID""#);
    }

    #[test]
    fn timestamps_render_as_iso8601() {
        let mut buf = BytesMut::new();
        super::write(
            &PgValue::Timestamp(time::macros::datetime!(2021-06-01 12:30:00)),
            &mut buf,
        )
        .unwrap();
        assert_eq!(&buf[..], br#""2021-06-01T12:30:00.0Z""#);
    }

    #[test]
    fn raw_fallback_is_not_json() {
        let mut buf = BytesMut::new();
        let raw = PgValue::Raw { oid: 9_999_999, bytes: bytes::Bytes::from_static(&[1]) };
        assert!(super::write(&raw, &mut buf).is_err());
    }
}
