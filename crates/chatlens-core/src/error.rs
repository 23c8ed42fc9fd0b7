//! Error types for chatlens.
//!
//! Low-level engine, sandbox and database failures are converted into
//! these variants at each component boundary. Messages carry enough
//! context for logs but never key material.

use thiserror::Error;

/// Core error type for chatlens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The keystream bytecode module could not be located, loaded or
    /// instantiated.
    #[error("keystream engine initialization failed: {0}")]
    EngineInit(String),

    /// The module is loaded but a cipher entry point is missing or trapped.
    #[error("keystream derivation failed: {0}")]
    Derivation(String),

    /// The module ran without delivering the expected output region.
    #[error("keystream capture failed: {0}")]
    Capture(String),

    /// A blob that requires a key was submitted without one.
    #[error("media key missing")]
    KeyMissing,

    /// The store could not open a cursor (not connected, bad key, ...).
    #[error("failed to open cursor: {0}")]
    CursorOpen(String),

    /// A batch fetch on an open cursor failed.
    #[error("cursor error: {0}")]
    Cursor(String),

    /// Media decryption or cache write failed.
    #[error("media error: {0}")]
    Media(String),

    /// The media fetch collaborator could not deliver the blob.
    #[error("download failed: {0}")]
    Download(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied an argument the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using chatlens' Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Failures a caller may reasonably re-request (e.g. on user action).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CursorOpen(_) | Error::Cursor(_) | Error::Download(_) | Error::Media(_)
        )
    }

    /// Whether the failure originated in the keystream subsystem.
    pub fn is_keystream_failure(&self) -> bool {
        matches!(
            self,
            Error::EngineInit(_) | Error::Derivation(_) | Error::Capture(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
