//! Binary codec for one-dimensional arrays.
//!
//! The wire header is 20 bytes: `int32 ndim, int32 hasnull,
//! uint32 element_oid, int32 dim0_len, int32 dim0_lower_bound`, followed
//! per element by an `int32` length and the element payload. Only
//! one-dimensional arrays of non-null elements are supported; anything
//! else is surfaced as an error, never corrupted.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{DecodeError, Oid, PgValue, UnsupportedType};
use crate::ext::UsizeExt;

pub(crate) fn encode(
    values: &[PgValue],
    element_oid: Oid,
    buf: &mut BytesMut,
) -> Result<(), UnsupportedType> {
    buf.put_i32(1); // dimensions
    buf.put_i32(0); // has nulls
    buf.put_u32(element_oid);
    buf.put_i32(values.len().to_i32());
    buf.put_i32(1); // lower bound

    for value in values {
        if value.is_null() {
            return Err(UnsupportedType::new("array elements must not be null".into()));
        }
        // reserve the length, encode, then patch
        let offset = buf.len();
        buf.put_i32(0);
        super::encode(value, element_oid, buf)?;
        let len = (buf.len() - offset - 4).to_i32();
        buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

pub(crate) fn decode(mut body: Bytes, element_oid: Oid) -> Result<PgValue, DecodeError> {
    if body.remaining() < 12 {
        return Err(DecodeError::length("array header", 12, body.remaining()));
    }

    let ndim = body.get_i32();
    let _has_nulls = body.get_i32();
    let wire_element = body.get_u32();

    // the server writes no dimension block at all for an empty array
    if ndim == 0 {
        return Ok(PgValue::Array(Vec::new()));
    }
    if ndim != 1 {
        return Err(DecodeError::new(format!("unsupported {ndim}-dimensional array")));
    }
    if wire_element != element_oid {
        return Err(DecodeError::new(format!(
            "array element oid mismatch: declared {element_oid}, wire {wire_element}",
        )));
    }

    if body.remaining() < 8 {
        return Err(DecodeError::length("array dimension", 8, body.remaining()));
    }
    let len = body.get_i32().max(0) as usize;
    let _lower_bound = body.get_i32();

    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        if body.remaining() < 4 {
            return Err(DecodeError::length("array element", 4, body.remaining()));
        }
        let value_len = body.get_i32();
        if value_len < 0 {
            return Err(DecodeError::new("unsupported null array element".into()));
        }
        let value_len = value_len as usize;
        if body.remaining() < value_len {
            return Err(DecodeError::length("array element", value_len, body.remaining()));
        }
        values.push(super::decode(element_oid, body.split_to(value_len))?);
    }

    Ok(PgValue::Array(values))
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::{decode, encode};
    use crate::types::{PgValue, oid};

    fn roundtrip(values: Vec<PgValue>, elem: super::Oid) -> PgValue {
        let mut buf = BytesMut::new();
        encode(&values, elem, &mut buf).unwrap();
        decode(buf.freeze(), elem).unwrap()
    }

    #[test]
    fn int4_array() {
        let values = vec![PgValue::Int4(1), PgValue::Int4(-2), PgValue::Int4(3)];
        assert_eq!(roundtrip(values.clone(), oid::INT4), PgValue::Array(values));
    }

    #[test]
    fn text_array() {
        let values = vec![PgValue::Text("a".into()), PgValue::Text("".into())];
        assert_eq!(roundtrip(values.clone(), oid::TEXT), PgValue::Array(values));
    }

    #[test]
    fn header_layout() {
        let mut buf = BytesMut::new();
        encode(&[PgValue::Int2(5)], oid::INT2, &mut buf).unwrap();
        // 20-byte header + (4-byte length + 2-byte payload)
        assert_eq!(buf.len(), 26);
        assert_eq!(&buf[..4], &1i32.to_be_bytes());
        assert_eq!(&buf[4..8], &0i32.to_be_bytes());
        assert_eq!(&buf[8..12], &oid::INT2.to_be_bytes());
        assert_eq!(&buf[12..16], &1i32.to_be_bytes());
        assert_eq!(&buf[16..20], &1i32.to_be_bytes());
    }

    #[test]
    fn empty_array_decodes_from_zero_dimensions() {
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(oid::INT4);
        assert_eq!(decode(buf.freeze(), oid::INT4).unwrap(), PgValue::Array(vec![]));
    }

    #[test]
    fn multidimensional_is_refused() {
        let mut buf = BytesMut::new();
        buf.put_i32(2);
        buf.put_i32(0);
        buf.put_u32(oid::INT4);
        buf.put_i32(1);
        buf.put_i32(1);
        assert!(decode(buf.freeze(), oid::INT4).is_err());
    }

    #[test]
    fn null_elements_are_refused() {
        let mut buf = BytesMut::new();
        assert!(encode(&[PgValue::Null], oid::INT4, &mut buf).is_err());

        let mut buf = BytesMut::new();
        buf.put_i32(1);
        buf.put_i32(1);
        buf.put_u32(oid::INT4);
        buf.put_i32(1);
        buf.put_i32(1);
        buf.put_i32(-1); // null element
        assert!(decode(buf.freeze(), oid::INT4).is_err());
    }

    #[test]
    fn nested_arrays_are_refused() {
        let mut buf = BytesMut::new();
        let nested = [PgValue::Array(vec![PgValue::Int4(1)])];
        assert!(encode(&nested, oid::INT4, &mut buf).is_err());
    }
}
