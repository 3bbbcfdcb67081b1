//! Binary codec for `numeric`.
//!
//! The wire layout is `uint16 ndigits, int16 weight, uint16 sign,
//! uint16 dscale` followed by `ndigits` base-10000 digit groups as
//! `uint16`. Values travel as decimal strings, never as host floats, so
//! the full 131072-integer / 16383-fractional digit range survives.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::Write;

use super::{DecodeError, UnsupportedType};

const SIGN_PLUS: u16 = 0x0000;
const SIGN_MINUS: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

/// Decode a wire `numeric` into its decimal string.
pub(crate) fn decode(mut body: Bytes) -> Result<String, DecodeError> {
    if body.remaining() < 8 {
        return Err(DecodeError::length("numeric", 8, body.remaining()));
    }
    let ndigits = body.get_u16() as usize;
    let weight = body.get_i16() as i32;
    let sign = body.get_u16();
    let dscale = body.get_u16() as usize;

    match sign {
        SIGN_NAN => return Ok("NaN".into()),
        SIGN_PINF => return Ok("Infinity".into()),
        SIGN_NINF => return Ok("-Infinity".into()),
        SIGN_PLUS | SIGN_MINUS => {}
        s => return Err(DecodeError::new(format!("invalid numeric sign {s:#06x}"))),
    }

    if body.remaining() < ndigits * 2 {
        return Err(DecodeError::length("numeric digits", ndigits * 2, body.remaining()));
    }
    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        digits.push(body.get_u16());
    }

    let mut out = String::with_capacity(4 * (weight.unsigned_abs() as usize + 2) + dscale + 2);
    if sign == SIGN_MINUS {
        out.push('-');
    }

    // integer part: weight + 1 groups; groups past ndigits are trailing
    // zeros, every group but the first is zero-padded to four digits
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight as usize {
            let group = digits.get(i).copied().unwrap_or(0);
            if i == 0 {
                let mut b = itoa::Buffer::new();
                out.push_str(b.format(group));
            } else {
                write!(out, "{group:04}").expect("write to String");
            }
        }
    }

    // fraction: exactly dscale digits, left-padded for small magnitudes
    if dscale > 0 {
        out.push('.');
        let mut fraction = String::with_capacity(dscale + 4);
        for _ in 0..4 * (-weight - 1).max(0) {
            fraction.push('0');
        }
        let first_fraction_group = (weight + 1).max(0) as usize;
        for i in first_fraction_group..ndigits {
            if fraction.len() > dscale {
                break;
            }
            write!(fraction, "{:04}", digits[i]).expect("write to String");
        }
        fraction.truncate(dscale);
        while fraction.len() < dscale {
            fraction.push('0');
        }
        out.push_str(&fraction);
    }

    Ok(out)
}

/// Encode a decimal string as a wire `numeric`.
pub(crate) fn encode(text: &str, buf: &mut BytesMut) -> Result<(), UnsupportedType> {
    match text {
        "NaN" => return Ok(special(SIGN_NAN, buf)),
        "Infinity" => return Ok(special(SIGN_PINF, buf)),
        "-Infinity" => return Ok(special(SIGN_NINF, buf)),
        _ => {}
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (whole, fraction) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };

    if unsigned.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit())
    {
        return Err(UnsupportedType::invalid_numeric(text));
    }

    // canonical weight comes from the value, not its rendering
    let whole = whole.trim_start_matches('0');

    // postgres caps numeric at 131072 integer and 16383 fractional digits
    let dscale = fraction.len();
    if whole.len() > 131_072 || dscale > 16_383 {
        return Err(UnsupportedType::invalid_numeric(text));
    }

    // left-pad the whole part and right-pad the fraction to whole groups
    let whole_groups = whole.len().div_ceil(4);
    let fraction_groups = fraction.len().div_ceil(4);
    let ndigits = whole_groups + fraction_groups;
    let weight = whole_groups as i32 - 1;

    let mut digits = Vec::with_capacity(ndigits);
    let lead = whole_groups * 4 - whole.len();
    let mut group = 0u16;
    for (i, b) in std::iter::repeat_n(b'0', lead).chain(whole.bytes()).enumerate() {
        group = group * 10 + (b - b'0') as u16;
        if i % 4 == 3 {
            digits.push(group);
            group = 0;
        }
    }
    for (i, b) in fraction
        .bytes()
        .chain(std::iter::repeat_n(b'0', fraction_groups * 4 - fraction.len()))
        .enumerate()
    {
        group = group * 10 + (b - b'0') as u16;
        if i % 4 == 3 {
            digits.push(group);
            group = 0;
        }
    }

    // the sign of zero is normalized to plus
    let sign = match negative && digits.iter().any(|&d| d != 0) {
        true => SIGN_MINUS,
        false => SIGN_PLUS,
    };

    buf.put_u16(ndigits as u16);
    buf.put_i16(weight as i16);
    buf.put_u16(sign);
    buf.put_u16(dscale as u16);
    for d in digits {
        buf.put_u16(d);
    }
    Ok(())
}

fn special(sign: u16, buf: &mut BytesMut) {
    buf.put_u16(0);
    buf.put_i16(0);
    buf.put_u16(sign);
    buf.put_u16(0);
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::{decode, encode};

    fn roundtrip(text: &str) -> String {
        let mut buf = BytesMut::new();
        encode(text, &mut buf).unwrap();
        decode(buf.freeze()).unwrap()
    }

    #[test]
    fn plain_values() {
        assert_eq!(roundtrip("0"), "0");
        assert_eq!(roundtrip("1"), "1");
        assert_eq!(roundtrip("-1"), "-1");
        assert_eq!(roundtrip("42000"), "42000");
        assert_eq!(roundtrip("12345678"), "12345678");
        assert_eq!(roundtrip("-9999.9999"), "-9999.9999");
        assert_eq!(roundtrip("3.14159265358979"), "3.14159265358979");
    }

    #[test]
    fn trailing_zeros_preserved_by_dscale() {
        assert_eq!(roundtrip("0.123400000000"), "0.123400000000");
        assert_eq!(roundtrip("1.000"), "1.000");
        assert_eq!(roundtrip("10.10"), "10.10");
    }

    #[test]
    fn small_magnitudes_pad_left() {
        assert_eq!(roundtrip("0.0001"), "0.0001");
        assert_eq!(roundtrip("0.00000001"), "0.00000001");
        assert_eq!(roundtrip("0.000123456789"), "0.000123456789");
        assert_eq!(roundtrip("-0.5"), "-0.5");
    }

    #[test]
    fn negative_zero_reads_as_zero() {
        assert_eq!(roundtrip("-0"), "0");
        assert_eq!(roundtrip("-0.000"), "0.000");
    }

    #[test]
    fn specials() {
        assert_eq!(roundtrip("NaN"), "NaN");
        assert_eq!(roundtrip("Infinity"), "Infinity");
        assert_eq!(roundtrip("-Infinity"), "-Infinity");
    }

    #[test]
    fn maximum_precision() {
        let huge = format!("{}.{}", "9".repeat(131_072), "9".repeat(16_383));
        assert_eq!(roundtrip(&huge), huge);
    }

    #[test]
    fn rejects_garbage() {
        let mut buf = BytesMut::new();
        assert!(encode("12a4", &mut buf).is_err());
        assert!(encode("", &mut buf).is_err());
        assert!(encode("--3", &mut buf).is_err());
    }

    #[test]
    fn redundant_leading_zeros_are_canonicalized() {
        assert_eq!(roundtrip("000042"), "42");
        assert_eq!(roundtrip("007.25"), "7.25");
    }
}
