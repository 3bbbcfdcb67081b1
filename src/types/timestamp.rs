//! Binary codec for `timestamp` and `timestamptz`.
//!
//! The wire value is a signed 64-bit count of microseconds since
//! 2000-01-01T00:00:00Z. Both types share the codec; `timestamptz` is
//! always transferred in UTC. Microsecond precision is preserved in both
//! directions.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use time::{
    Duration, PrimitiveDateTime,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
    macros::datetime,
};

use super::{DecodeError, UnsupportedType};

/// The postgres timestamp epoch.
pub(crate) const POSTGRES_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 00:00:00);

/// Render an instant as ISO-8601 text, for the json coercion.
///
/// Timestamps of this library are UTC by definition, hence the `Z`.
pub(crate) fn iso8601(value: PrimitiveDateTime) -> String {
    let mut out = value.format(&DESCRIPTION).expect("format is statically known");
    out.push('Z');
    out
}

const DESCRIPTION: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
    I::Literal(b"T"),
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Literal(b"."),
    I::Component(C::Subsecond(modifier::Subsecond::default())),
];

pub(crate) fn decode(mut body: Bytes) -> Result<PrimitiveDateTime, DecodeError> {
    if body.remaining() != 8 {
        return Err(DecodeError::length("timestamp", 8, body.remaining()));
    }
    let micros = body.get_i64();
    POSTGRES_EPOCH
        .checked_add(Duration::microseconds(micros))
        .ok_or_else(|| DecodeError::new(format!("timestamp out of range: {micros}µs")))
}

pub(crate) fn encode(
    value: PrimitiveDateTime,
    buf: &mut BytesMut,
) -> Result<(), UnsupportedType> {
    let micros = i64::try_from((value - POSTGRES_EPOCH).whole_microseconds())
        .map_err(|_| UnsupportedType::out_of_range("timestamp"))?;
    buf.put_i64(micros);
    Ok(())
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use time::macros::datetime;

    use super::{POSTGRES_EPOCH, decode, encode};

    fn roundtrip(dt: time::PrimitiveDateTime) -> time::PrimitiveDateTime {
        let mut buf = BytesMut::new();
        encode(dt, &mut buf).unwrap();
        decode(buf.freeze()).unwrap()
    }

    #[test]
    fn epoch_is_zero() {
        let mut buf = BytesMut::new();
        encode(POSTGRES_EPOCH, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0; 8]);
    }

    #[test]
    fn microseconds_survive() {
        let dt = datetime!(2024-02-29 13:37:42.123456);
        assert_eq!(roundtrip(dt), dt);
    }

    #[test]
    fn before_the_epoch() {
        let dt = datetime!(1969-07-20 20:17:40.000001);
        assert_eq!(roundtrip(dt), dt);
    }

    #[test]
    fn known_wire_value() {
        // one minute past the epoch
        let mut buf = BytesMut::new();
        encode(datetime!(2000-01-01 00:01:00), &mut buf).unwrap();
        assert_eq!(&buf[..], &60_000_000i64.to_be_bytes());
    }

    #[test]
    fn iso8601_rendering() {
        assert_eq!(
            super::iso8601(datetime!(2021-06-01 12:30:00)),
            "2021-06-01T12:30:00.0Z",
        );
        assert_eq!(
            super::iso8601(datetime!(2024-02-29 13:37:42.000042)),
            "2024-02-29T13:37:42.000042Z",
        );
    }
}
