//! Error kinds shared by every Nuggit layer.
//!
//! Each [`Error`] carries a [`Code`], whose wire name and HTTP status are
//! what the server reports to clients:
//!
//! ```json
//! { "status": "not found", "reason": "pipe not found: foo@…" }
//! ```

use std::fmt;

use serde::Serialize;

use crate::identity::NameDigest;

/// Result alias used throughout the core crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status codes, named on the wire exactly as clients see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Code {
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "invalid argument")]
    InvalidArgument,
    #[serde(rename = "deadline exceeded")]
    DeadlineExceeded,
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "already exists")]
    AlreadyExists,
    #[serde(rename = "permission denied")]
    PermissionDenied,
    #[serde(rename = "resource exhausted")]
    ResourceExhausted,
    #[serde(rename = "failed precondition")]
    FailedPrecondition,
    #[serde(rename = "aborted")]
    Aborted,
    #[serde(rename = "out of range")]
    OutOfRange,
    #[serde(rename = "unimplemented")]
    Unimplemented,
    #[serde(rename = "internal")]
    Internal,
    #[serde(rename = "unavailable")]
    Unavailable,
    #[serde(rename = "data loss")]
    DataLoss,
    #[serde(rename = "unauthenticated")]
    Unauthenticated,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid argument",
            Code::DeadlineExceeded => "deadline exceeded",
            Code::NotFound => "not found",
            Code::AlreadyExists => "already exists",
            Code::PermissionDenied => "permission denied",
            Code::ResourceExhausted => "resource exhausted",
            Code::FailedPrecondition => "failed precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out of range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// HTTP status code reported for this kind.
    ///
    /// `aborted` has no dedicated mapping and is reported as a conflict.
    pub fn http_status(self) -> u16 {
        match self {
            Code::NotFound => 404,
            Code::AlreadyExists => 409,
            Code::Aborted => 409,
            Code::InvalidArgument => 400,
            Code::FailedPrecondition => 412,
            Code::Unimplemented => 501,
            Code::Internal | Code::DataLoss | Code::Unknown => 500,
            Code::Unavailable => 503,
            Code::Canceled => 499,
            Code::DeadlineExceeded => 504,
            Code::ResourceExhausted => 507,
            Code::OutOfRange => 416,
            Code::Unauthenticated => 401,
            Code::PermissionDenied => 403,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the resource model, planner, and stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A name-only reference matched more than one digest.
    #[error("ambiguous reference: {name} matches {count} digests")]
    Ambiguous { name: String, count: usize },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Residual edge left over after a topological traversal.
    #[error("cycle detected: {from} -> {to}")]
    Cycle { from: NameDigest, to: NameDigest },

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument(_) => Code::InvalidArgument,
            Error::NotFound(_) => Code::NotFound,
            Error::Ambiguous { .. } => Code::FailedPrecondition,
            Error::AlreadyExists(_) => Code::AlreadyExists,
            Error::FailedPrecondition(_) => Code::FailedPrecondition,
            Error::Cycle { .. } => Code::FailedPrecondition,
            Error::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Error::Unavailable(_) => Code::Unavailable,
            Error::Internal(_) => Code::Internal,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::FailedPrecondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match value.classify() {
            Category::Syntax | Category::Data | Category::Eof => {
                Error::InvalidArgument(value.to_string())
            }
            Category::Io => Error::Internal(value.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Error::InvalidArgument(value.to_string())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        match &value {
            sqlx::Error::RowNotFound => Error::NotFound(value.to_string()),
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => Error::AlreadyExists(db.message().to_string()),
                ErrorKind::ForeignKeyViolation => {
                    Error::FailedPrecondition(db.message().to_string())
                }
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    Error::InvalidArgument(db.message().to_string())
                }
                _ => Error::Internal(db.message().to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::Unavailable(value.to_string())
            }
            _ => Error::Internal(value.to_string()),
        }
    }
}
