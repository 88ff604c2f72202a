use core::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::{error, io};

use thiserror::Error;

pub type Result<T, E = TabulaError> = core::result::Result<T, E>;

/// Application errors
#[derive(Error)]
pub enum TabulaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reference {0} uses a bad-case name")]
    BadCase(String),

    #[error("Name {0} is already in use")]
    NameTaken(String),

    #[error("Dataset {0} has no history")]
    NoHistory(String),

    #[error("Store does not support pinning")]
    NotPinner,

    #[error("This dataset has no body")]
    NoBodyToInline,

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("{0}")]
    General(String),

    #[error("{0}")]
    Io(io::Error),

    #[error("{0}")]
    Wrapped(Box<dyn error::Error + Send + Sync>),
}

/// Constructs a `TabulaError::NotFound` for a dataset reference
pub fn not_found(alias: &str) -> TabulaError {
    TabulaError::NotFound(format!("Dataset {}", alias))
}

/// Constructs a `TabulaError::NotFound` for a content address
pub fn not_found_path(path: &str) -> TabulaError {
    TabulaError::NotFound(format!("Path {}", path))
}

impl TabulaError {
    /// Returns true if the error is the `NotFound` sentinel
    pub fn is_not_found(&self) -> bool {
        matches!(self, TabulaError::NotFound(_))
    }

    /// Returns true if the error is the `Timeout` sentinel
    pub fn is_timeout(&self) -> bool {
        matches!(self, TabulaError::Timeout(_))
    }
}

impl Debug for TabulaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for TabulaError {
    fn from(e: io::Error) -> Self {
        TabulaError::Io(e)
    }
}

impl From<serde_json::Error> for TabulaError {
    fn from(e: serde_json::Error) -> Self {
        TabulaError::Wrapped(Box::new(e))
    }
}

impl From<serde_cbor::Error> for TabulaError {
    fn from(e: serde_cbor::Error) -> Self {
        TabulaError::Wrapped(Box::new(e))
    }
}

impl From<csv::Error> for TabulaError {
    fn from(e: csv::Error) -> Self {
        TabulaError::Wrapped(Box::new(e))
    }
}

impl From<walkdir::Error> for TabulaError {
    fn from(e: walkdir::Error) -> Self {
        TabulaError::Wrapped(Box::new(e))
    }
}
