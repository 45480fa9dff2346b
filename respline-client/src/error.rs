//! # Client Errors
//!
//! Purpose: One error type for everything a callback can receive, from codec
//! rejections to transport failures and session lifecycle violations.

use std::io;

use respline_common::RespError;
use thiserror::Error;

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by sessions, either from `fetch` directly or through a
/// reply callback.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Command could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// Malformed frame from the server. Fatal for the session.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Server returned an error reply. The session stays usable.
    #[error("server error: {0}")]
    Server(String),
    /// Connect, read or write failure. Fatal for the session.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// A reply arrived with no outstanding request. Fatal for the session.
    #[error("reply received with no pending request")]
    EmptyQueue,
    /// The session is in subscribe mode and cannot issue ordinary requests.
    #[error("session is subscribed; ordinary requests are not issued")]
    SubscribeActive,
    /// The session is closed.
    #[error("session closed")]
    Closed,
}

impl ClientError {
    /// Returns true when the error closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::Transport(_) | ClientError::EmptyQueue
        )
    }
}

impl From<RespError> for ClientError {
    fn from(err: RespError) -> Self {
        match err {
            RespError::Encoding(message) => ClientError::Encoding(message),
            RespError::Protocol(message) => ClientError::Protocol(message),
            RespError::Server(message) => ClientError::Server(message),
        }
    }
}
