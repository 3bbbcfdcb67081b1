//! `postgate` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io, str::Utf8Error, time::Duration};

use crate::{
    connection::{AuthError, ParseError},
    postgres::{DatabaseError, ProtocolError},
    types::{DecodeError, UnsupportedType},
};

/// A specialized [`Result`] type for `postgate` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from the `postgate` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

/// All possible error kinds from the `postgate` library.
pub enum ErrorKind {
    /// Invalid configuration or connection url.
    Config(ParseError),
    /// Socket level failure; terminal for the connection.
    Io(io::Error),
    /// TLS was required but could not be established.
    Tls(TlsError),
    /// Authentication handshake failure, before the connection is usable.
    Auth(AuthError),
    /// The backend replied out of order; terminal for the connection.
    Protocol(ProtocolError),
    /// `ErrorResponse` from the backend; terminal for the phase, the
    /// connection survives.
    Database(Box<DatabaseError>),
    /// The query was cancelled, explicitly or by the query timeout.
    Cancelled(Cancelled),
    /// A connection attempt exceeded the connect timeout.
    ConnectTimeout(ConnectTimeout),
    /// A parameter could not be bound to its declared type.
    Unsupported(UnsupportedType),
    /// A wire value could not be decoded.
    Decode(DecodeError),
    /// Postgres returned a non UTF-8 string.
    Utf8(Utf8Error),
    /// Operation on a destroyed pool.
    PoolClosed(PoolClosed),
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the display output with an operation context.
    pub(crate) fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// The backend error, when this is [`ErrorKind::Database`].
    pub fn as_database(&self) -> Option<&DatabaseError> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the query was cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled(_))
    }

    /// Whether a timeout produced this error, in either phase.
    pub fn is_timeout(&self) -> bool {
        match &self.kind {
            ErrorKind::Cancelled(c) => c.timeout,
            ErrorKind::ConnectTimeout(_) => true,
            _ => false,
        }
    }

    pub(crate) fn cancelled(during: &'static str, timeout: bool) -> Self {
        ErrorKind::Cancelled(Cancelled { during, timeout }).into()
    }

    pub(crate) fn connect_timeout(timeout: Duration) -> Self {
        ErrorKind::ConnectTimeout(ConnectTimeout { timeout }).into()
    }

    pub(crate) fn pool_closed() -> Self {
        ErrorKind::PoolClosed(PoolClosed).into()
    }

    pub(crate) fn tls(reason: Cow<'static, str>) -> Self {
        ErrorKind::Tls(TlsError { reason }).into()
    }
}

/// The query was cancelled before it completed.
///
/// The connection remains usable afterwards; only the active statement
/// failed.
#[derive(Debug)]
pub struct Cancelled {
    /// The phase the cancel interrupted.
    pub during: &'static str,
    /// Whether the query timeout, rather than an explicit cancel,
    /// triggered it.
    pub timeout: bool,
}

impl std::error::Error for Cancelled {}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeout {
            true => write!(f, "query timed out {}", self.during),
            false => write!(f, "query cancelled {}", self.during),
        }
    }
}

/// A connection attempt did not complete within the configured window.
#[derive(Debug, thiserror::Error)]
#[error("connect timed out after {timeout:?}")]
pub struct ConnectTimeout {
    pub timeout: Duration,
}

/// The pool was destroyed.
#[derive(Debug, thiserror::Error)]
#[error("connection pool is destroyed")]
pub struct PoolClosed;

/// TLS negotiation failure.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct TlsError {
    reason: Cow<'static, str>,
}

impl TlsError {
    pub(crate) fn new(reason: Cow<'static, str>) -> Self {
        Self { reason }
    }
}

impl fmt::Debug for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<TlsError>e => ErrorKind::Tls(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<DatabaseError>e => ErrorKind::Database(Box::new(e)));
from!(<UnsupportedType>e => ErrorKind::Unsupported(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<PoolClosed>e => ErrorKind::PoolClosed(e));

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Tls(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Cancelled(e) => e.fmt(f),
            Self::ConnectTimeout(e) => e.fmt(f),
            Self::Unsupported(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::PoolClosed(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
