//! Unified error taxonomy of the execution core.
//!
//! Every failure the pipeline or controller can report is one `Error`
//! variant. Each variant belongs to one [`ErrorKind`], which fixes the HTTP
//! status:
//! - `Validation` → 400
//! - `Authorization` → 403
//! - `NotFound` → 404
//! - `PreconditionFailed` → 412
//! - `NotImplemented` → 501
//! - `Internal` → 500

use http::StatusCode;
use thiserror::Error;

use crate::hooks::HookRejection;
use crate::key::KeyError;
use crate::reference::ReferenceError;
use crate::value::ValueError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    PreconditionFailed,
    NotImplemented,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid entity reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("invalid binding '{property}': {reason}")]
    InvalidBinding { property: String, reason: String },

    #[error("invalid {option}: {reason}")]
    InvalidQueryOption { option: String, reason: String },

    #[error("invalid $skiptoken: {0}")]
    InvalidSkipToken(String),

    #[error("invalid $deltatoken")]
    InvalidDeltaToken,

    #[error("{0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("precondition failed: ETag does not match")]
    PreconditionFailed,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidReference(_)
            | Error::InvalidKey(_)
            | Error::InvalidBinding { .. }
            | Error::InvalidQueryOption { .. }
            | Error::InvalidSkipToken(_)
            | Error::InvalidDeltaToken
            | Error::Validation(_) => ErrorKind::Validation,
            Error::Forbidden(_) => ErrorKind::Authorization,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PreconditionFailed => ErrorKind::PreconditionFailed,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    #[must_use]
    pub fn binding(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidBinding {
            property: property.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn query_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidQueryOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    #[must_use]
    pub fn not_implemented(what: impl Into<String>) -> Self {
        Error::NotImplemented(what.into())
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<HookRejection> for Error {
    fn from(r: HookRejection) -> Self {
        Error::Forbidden(r.message)
    }
}

impl From<ValueError> for Error {
    fn from(e: ValueError) -> Self {
        Error::Validation(e.to_string())
    }
}
