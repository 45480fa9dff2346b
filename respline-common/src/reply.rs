//! # Reply Values
//!
//! Purpose: Represent one decoded RESP frame as a tagged value tree.
//!
//! ## Design Principles
//! 1. **Null Is Not Empty**: `BulkString(None)` and `Array(None)` are distinct
//!    from an empty payload and must never be collapsed.
//! 2. **Binary-Safe**: Bulk payloads are `Bytes`, sliced straight out of the
//!    transport buffer.
//! 3. **Recursive Arrays**: Array elements may be any variant, arrays included.

use std::fmt;

use bytes::Bytes;

use crate::error::{RespError, RespResult};

/// A single RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` style status line.
    Status(String),
    /// `-ERR ...` error line.
    Error(String),
    /// `:123` integer.
    Integer(i64),
    /// `$...` bulk string; `None` for the null bulk `$-1`.
    BulkString(Option<Bytes>),
    /// `*...` array; `None` for the null array `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Builds a non-null bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::BulkString(Some(data.into()))
    }

    /// Builds a status reply.
    pub fn status(text: impl Into<String>) -> Self {
        Reply::Status(text.into())
    }

    /// Builds a non-null array reply.
    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }

    /// Returns true for `$-1` and `*-1`.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::BulkString(None) | Reply::Array(None))
    }

    /// Returns the payload of a non-null bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::BulkString(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Returns the value of an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the elements of a non-null array.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Surfaces a top-level error reply as `RespError::Server`.
    ///
    /// Error values nested inside arrays are left untouched.
    pub fn into_result(self) -> RespResult<Reply> {
        match self {
            Reply::Error(message) => Err(RespError::Server(message)),
            other => Ok(other),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(text) => write!(f, "{}", text),
            Reply::Error(text) => write!(f, "(error) {}", text),
            Reply::Integer(value) => write!(f, "(integer) {}", value),
            Reply::BulkString(None) | Reply::Array(None) => write!(f, "(nil)"),
            Reply::BulkString(Some(data)) => write!(f, "{:?}", String::from_utf8_lossy(data)),
            Reply::Array(Some(items)) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
