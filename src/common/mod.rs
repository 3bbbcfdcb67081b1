//! Supporting utility types.
mod bytestr;
pub use bytestr::ByteStr;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "verbose")]
            tracing::trace!($($tt)*);
        }
    };
}

/// Format into a `Cow<'static, str>`.
macro_rules! general {
    ($($tt:tt)*) => {
        std::borrow::Cow::<'static, str>::Owned(format!($($tt)*))
    };
}

pub(crate) use general;
pub(crate) use verbose;
