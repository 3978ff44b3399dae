//! Error types for objvault
//!
//! A deliberately small taxonomy: missing keys are not errors anywhere in the
//! API (lookups return `Option` or `bool`), so the only things that can fail
//! are the backing file, the key codec, and the peer transport.

use thiserror::Error;

/// Common result type for objvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for objvault
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error on the backing file
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key or wire message failed to encode or decode
    #[error("codec error: {0}")]
    Codec(String),

    /// A message could not be handed to or taken from the transport
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this is an I/O error
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
