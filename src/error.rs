//! Error type shared by the fingerprinting pipeline and the stores.
//!
//! Empty results (no peaks, no candidate songs) are not errors: they come
//! back as empty collections.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{field} value {value} does not fit the hash field (max {max})")]
    EncodingOverflow {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("fingerprint store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("a song with key '{0}' is already in the catalog")]
    DuplicateSong(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to decode '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput(reason.into())
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed config: {err}"))
    }
}
