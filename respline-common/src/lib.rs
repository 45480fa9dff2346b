// respline-common - Wire types and codec for the respline client
//
// This crate knows nothing about sockets: it turns commands into RESP bytes
// and complete RESP frames back into replies.

pub mod codec;
pub mod command;
pub mod error;
pub mod reply;

// Re-export for convenience
pub use codec::{decode, encode, parse_header, Header, CRLF, MAX_NESTING_DEPTH};
pub use command::{Command, IntoArg};
pub use error::{RespError, RespResult};
pub use reply::Reply;
