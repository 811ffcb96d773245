//! Error types shared across the avpipe crates.

use thiserror::Error;

/// Main error type for the avpipe pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the external codec engine.
    #[error("engine error: {0}")]
    Engine(String),

    /// Container-level failure (demuxing/muxing).
    #[error("container error: {0}")]
    Container(String),

    /// Unsupported format or conversion.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid parameter provided by the caller.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of stream reached.
    #[error("end of stream")]
    EndOfStream,
}

impl Error {
    /// Create an engine error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }

    /// Create a container error.
    pub fn container(msg: impl Into<String>) -> Self {
        Error::Container(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
