//! Error types for backup reading.
//!
//! Every failure is fatal to the operation that produced it; callers may
//! retry by re-opening the backup. The variants mirror the stages of the
//! pipeline: I/O, framing, authentication, cipher state, SQL replay, and
//! the semantic queries on top.

use thiserror::Error;

/// Core error type for backup operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading or seeking the backup file failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// Malformed outer framing or protobuf content.
    #[error("format error: {0}")]
    Format(String),

    /// HMAC mismatch. Usually a wrong passphrase; otherwise a corrupt file.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// Cipher or MAC state could not be initialized.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// SQL statement replay or query failed.
    #[error("database error: {0}")]
    Db(String),

    /// A referenced recipient or attachment file does not exist.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Internally inconsistent backup: size mismatches, truncation,
    /// leftover mention placeholders.
    #[error("corrupt backup: {0}")]
    Corruption(String),
}

/// Result type alias using the backup [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Io("unexpected end of file".into())
        } else {
            Error::Io(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Db(e.to_string())
    }
}
