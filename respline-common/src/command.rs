//! # Commands
//!
//! Purpose: Build the ordered argument list of one request. A command is
//! only ever encoded, never decoded back.

use bytes::Bytes;

use crate::error::RespError;
use crate::reply::Reply;

/// Scalar values that can be used as a command argument.
///
/// Integers and floats are sent in their base-10 string form.
pub trait IntoArg {
    /// Converts the scalar into the bytes sent on the wire.
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! impl_display_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

impl_display_arg!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// An ordered request: command name followed by its arguments.
///
/// Built once, then immutable. An empty command can exist (via
/// `Command::default()` or an empty iterator) but is rejected by `encode`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Starts a command with its name, e.g. `Command::new("SET")`.
    pub fn new(name: impl IntoArg) -> Self {
        Command {
            args: vec![name.into_arg()],
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, value: impl IntoArg) -> Self {
        self.args.push(value.into_arg());
        self
    }

    /// Appends every argument from the iterator, in order.
    pub fn args<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoArg,
    {
        self.args.extend(values.into_iter().map(IntoArg::into_arg));
        self
    }

    /// Returns the command name, if any.
    pub fn name(&self) -> Option<&[u8]> {
        self.args.first().map(|arg| arg.as_ref())
    }

    /// Returns all arguments including the name.
    pub fn as_slice(&self) -> &[Bytes] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl<A: IntoArg> FromIterator<A> for Command {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Command {
            args: iter.into_iter().map(IntoArg::into_arg).collect(),
        }
    }
}

/// Re-issues decoded values as arguments.
///
/// Status, integer and non-null bulk replies are scalars; arrays, null bulks
/// and error replies are not and fail with `RespError::Encoding`.
impl TryFrom<Vec<Reply>> for Command {
    type Error = RespError;

    fn try_from(values: Vec<Reply>) -> Result<Self, Self::Error> {
        let mut args = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            let arg = match value {
                Reply::Status(text) => text.into_arg(),
                Reply::Integer(value) => value.into_arg(),
                Reply::BulkString(Some(data)) => data,
                other => {
                    return Err(RespError::Encoding(format!(
                        "argument {} is not a scalar: {:?}",
                        idx, other
                    )))
                }
            };
            args.push(arg);
        }
        Ok(Command { args })
    }
}
