//! Error types for sonar-player
//!
//! Load failures (`Fetch`, `Decode`) are per-track: the scheduler logs
//! them and retries the track on a later pass. Only `Config` is surfaced
//! from construction; playback operations never fail.

use thiserror::Error;

/// Main error type for sonar-player
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid track descriptor or ensemble options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source bytes could not be retrieved
    #[error("Fetch failed for {src}: {reason}")]
    Fetch { src: String, reason: String },

    /// Bytes could not be decoded into samples
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Output backend refused an operation
    #[error("Output backend error: {0}")]
    Backend(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from sonar-common (config files, TOML)
    #[error(transparent)]
    Common(#[from] sonar_common::Error),
}

impl Error {
    /// True for per-track failures the scheduler retries
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Decode(_) | Error::Io(_))
    }
}

/// Convenience Result type using sonar-player Error
pub type Result<T> = std::result::Result<T, Error>;
