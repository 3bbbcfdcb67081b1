use bytes::Bytes;

/// [`Bytes`] based str.
///
/// Cloning is cheap and slices share the same allocation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ByteStr {
    bytes: Bytes,
}

impl ByteStr {
    /// Copy a string into a new allocation.
    pub fn copy_from_str(string: &str) -> Self {
        Self { bytes: Bytes::copy_from_slice(string.as_bytes()) }
    }

    /// Wrap a static string without allocating.
    pub const fn from_static(string: &'static str) -> Self {
        Self { bytes: Bytes::from_static(string.as_bytes()) }
    }

    /// Validate `bytes` as UTF-8.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, std::str::Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self { bytes })
    }

    /// Slice a subset of `self` without copying.
    ///
    /// # Panics
    ///
    /// Panics if `subset` is not contained within `self`.
    pub fn slice_ref(&self, subset: &str) -> Self {
        Self { bytes: self.bytes.slice_ref(subset.as_bytes()) }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }
}

impl std::ops::Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for ByteStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<String> for ByteStr {
    fn from(value: String) -> Self {
        Self { bytes: Bytes::from(value.into_bytes()) }
    }
}

impl From<&str> for ByteStr {
    fn from(value: &str) -> Self {
        Self::copy_from_str(value)
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl std::fmt::Display for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}
