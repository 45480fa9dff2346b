//! # Codec Errors
//!
//! Purpose: Classify every way a command or a frame can be rejected by the
//! codec, so the session layer can decide what is fatal.

use thiserror::Error;

/// Result alias used across the codec.
pub type RespResult<T> = Result<T, RespError>;

/// Errors produced while encoding commands or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RespError {
    /// The command cannot be put on the wire (empty, or a non-scalar argument).
    #[error("encoding error: {0}")]
    Encoding(String),
    /// The frame is malformed: unknown marker, bad header, truncated payload.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The server answered with a `-` reply; carries the raw message text.
    #[error("server error: {0}")]
    Server(String),
}

impl RespError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        RespError::Protocol(message.into())
    }

    /// Returns true for errors that leave the byte stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RespError::Protocol(_))
    }
}
