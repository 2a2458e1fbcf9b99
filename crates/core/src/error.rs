//! Error types shared across the renderer.

use thiserror::Error;

/// Platform-level error type.
///
/// Graphics-API failures carry their own richer error type in the rhi crate;
/// this covers everything outside the device boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("window error: {0}")]
    Window(String),

    /// Native surface creation errors
    #[error("surface error: {0}")]
    Surface(String),

    /// IO errors (shader blobs)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using the shared [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
