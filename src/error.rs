use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Cinder errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Structural damage: short file, bad magic, CRC mismatch, undecodable
    /// blob index, or a blob index pointing at a file the registry does not
    /// know about.
    Corruption(String),
    /// An IO error.
    IO(String),
    /// The operation is not supported, e.g. a compaction filter attempting
    /// to rewrite a blob-index entry as an inline value.
    NotSupported(String),
    /// A state machine transition or API call that is invalid in the current
    /// state (e.g. GC-begin on a file already being collected).
    InvalidState(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// A cinder Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
