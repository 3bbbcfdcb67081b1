use bytes::{Buf, BufMut, Bytes};

use crate::common::ByteStr;

/// Integer signess in postgres docs is awful.
pub(crate) trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `i32`,
    /// this will panic when overflow instead of wrapping.
    fn to_i32(self) -> i32;
    /// Length is `usize` in rust, while sometime postgres want `i16`,
    /// this will panic when overflow instead of wrapping.
    fn to_i16(self) -> i16;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_i16(self) -> i16 {
        self.try_into().expect("message size too large for protocol")
    }
}

/// Nul string operation in [`BufMut`].
pub(crate) trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// A nul terminated string the backend sent was malformed.
///
/// Frames come off the wire unvalidated; a truncated or skewed frame
/// must surface as an error, never unwind the connection driver.
#[derive(Debug, thiserror::Error)]
pub(crate) enum NulStringError {
    #[error("missing nul terminator")]
    MissingNul,
    #[error("{0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Nul string operation in [`Bytes`].
pub(crate) trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`].
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, NulStringError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, NulStringError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(NulStringError::MissingNul);
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(ByteStr::from_utf8(me)?)
    }
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub(crate) trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub(crate) struct LossyFmt<'a>(pub &'a [u8]);

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
