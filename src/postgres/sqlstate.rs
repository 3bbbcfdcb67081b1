//! SQLSTATE codes reported in [`DatabaseError::code`][super::DatabaseError::code].
//!
//! A SQLSTATE is five characters; the first two are the class. Only the
//! classes and codes this library and its callers commonly branch on are
//! listed, sourced from the PostgreSQL errcodes appendix.
//!
//! <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// Class `08`, connection exception.
pub const CLASS_CONNECTION: &str = "08";
/// Class `22`, data exception.
pub const CLASS_DATA: &str = "22";
/// Class `23`, integrity constraint violation.
pub const CLASS_CONSTRAINT: &str = "23";
/// Class `25`, invalid transaction state.
pub const CLASS_TRANSACTION_STATE: &str = "25";
/// Class `28`, invalid authorization specification.
pub const CLASS_AUTHORIZATION: &str = "28";
/// Class `40`, transaction rollback.
pub const CLASS_ROLLBACK: &str = "40";
/// Class `42`, syntax error or access rule violation.
pub const CLASS_SYNTAX_OR_ACCESS: &str = "42";
/// Class `53`, insufficient resources.
pub const CLASS_RESOURCES: &str = "53";
/// Class `57`, operator intervention.
pub const CLASS_OPERATOR_INTERVENTION: &str = "57";

pub const CONNECTION_EXCEPTION: &str = "08000";
pub const CONNECTION_DOES_NOT_EXIST: &str = "08003";
pub const CONNECTION_FAILURE: &str = "08006";
pub const PROTOCOL_VIOLATION: &str = "08P01";

pub const DATA_EXCEPTION: &str = "22000";
pub const DIVISION_BY_ZERO: &str = "22012";
pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";

pub const INTEGRITY_CONSTRAINT_VIOLATION: &str = "23000";
pub const RESTRICT_VIOLATION: &str = "23001";
pub const NOT_NULL_VIOLATION: &str = "23502";
pub const FOREIGN_KEY_VIOLATION: &str = "23503";
pub const UNIQUE_VIOLATION: &str = "23505";
pub const CHECK_VIOLATION: &str = "23514";

pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";

pub const INVALID_PASSWORD: &str = "28P01";

pub const SERIALIZATION_FAILURE: &str = "40001";
pub const DEADLOCK_DETECTED: &str = "40P01";

pub const SYNTAX_ERROR: &str = "42601";
pub const UNDEFINED_COLUMN: &str = "42703";
pub const UNDEFINED_TABLE: &str = "42P01";
pub const DUPLICATE_PREPARED_STATEMENT: &str = "42P05";

pub const TOO_MANY_CONNECTIONS: &str = "53300";

/// The statement was cancelled, by an out-of-band `CancelRequest` or by
/// `statement_timeout` on the server.
pub const QUERY_CANCELED: &str = "57014";
pub const ADMIN_SHUTDOWN: &str = "57P01";
pub const CRASH_SHUTDOWN: &str = "57P02";
pub const CANNOT_CONNECT_NOW: &str = "57P03";
