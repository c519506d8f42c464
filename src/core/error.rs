//! Chain-wide error definitions.

use thiserror::Error;

use crate::http::chunked::ChunkedError;

/// Errors surfaced by chain operations.
///
/// Stalls and clean shutdowns are not errors; they never appear here.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The stage has no upstream (never opened, or closed).
    #[error("stage is not open")]
    NotOpen,

    /// Malformed chunked transfer coding. The stream cannot be resynchronized.
    #[error("chunked coding error: {0}")]
    Chunked(#[from] ChunkedError),

    /// TLS settings could not be turned into a usable engine configuration.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// The TLS session reported a fatal fault earlier and must be closed.
    #[error("TLS session is unusable after a fatal error")]
    TlsUnusable,

    /// The TLS session saw close_notify from either side; nothing more can be sent.
    #[error("TLS session is closed")]
    TlsClosed,

    /// A scanner was built with parameters it cannot work with.
    #[error("invalid scanner: {0}")]
    InvalidScanner(String),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rustls::Error> for ChainError {
    fn from(e: rustls::Error) -> Self {
        ChainError::TlsConfig(e.to_string())
    }
}
