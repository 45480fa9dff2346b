//! # RESP Encoding and Decoding
//!
//! Purpose: Encode commands into request frames and decode complete reply
//! frames, with no I/O involved.
//!
//! ## Design Principles
//! 1. **Shared Header Grammar**: `parse_header` is the single place that
//!    interprets a type line; the incremental parser in the client reuses it.
//! 2. **Binary-Safe**: Bulk payloads are taken by length, never scanned.
//! 3. **Fail Fast**: Unknown markers, bad numbers and truncated frames return
//!    `RespError::Protocol` immediately.
//!
//! ## Frame Layout
//!
//! ```text
//! +OK\r\n                      status
//! -ERR message\r\n             error
//! :42\r\n                      integer
//! $3\r\nfoo\r\n                bulk string      ($-1\r\n for null)
//! *2\r\n$3\r\nfoo\r\n:42\r\n   array            (*-1\r\n for null)
//! ```

use atoi::FromRadix10SignedChecked;
use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::{RespError, RespResult};
use crate::reply::Reply;

/// Line terminator used by every frame.
pub const CRLF: &[u8] = b"\r\n";

// Caps the up-front allocation for arrays so a hostile count cannot reserve
// gigabytes before any element arrives.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Deepest array nesting accepted; deeper frames are `RespError::Protocol`.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Interpreted type line of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// Complete status reply.
    Status(String),
    /// Complete error reply.
    Error(String),
    /// Complete integer reply.
    Integer(i64),
    /// Bulk string header; `None` is the null bulk, `Some(len)` announces a
    /// body of `len` bytes plus CRLF.
    Bulk(Option<usize>),
    /// Array header; `None` is the null array, `Some(count)` announces that
    /// many element frames.
    Array(Option<usize>),
}

/// Encodes a command as an array of bulk strings.
///
/// # Errors
/// Returns `RespError::Encoding` if the command has no arguments.
pub fn encode(command: &Command) -> RespResult<Bytes> {
    if command.is_empty() {
        return Err(RespError::Encoding("command is empty".to_string()));
    }

    let args = command.as_slice();
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    let mut out = BytesMut::with_capacity(payload + 16);

    out.put_u8(b'*');
    push_usize(&mut out, args.len());
    out.put_slice(CRLF);
    for arg in args {
        out.put_u8(b'$');
        push_usize(&mut out, arg.len());
        out.put_slice(CRLF);
        out.put_slice(arg);
        out.put_slice(CRLF);
    }
    Ok(out.freeze())
}

/// Decodes a buffer holding exactly one complete frame.
///
/// A top-level `-` frame surfaces as `RespError::Server` carrying the
/// message text; error values nested in arrays stay as `Reply::Error`.
///
/// # Errors
/// `RespError::Protocol` for unknown markers, malformed headers, truncated
/// payloads or trailing bytes after the frame.
pub fn decode(buffer: &[u8]) -> RespResult<Reply> {
    let mut pos = 0;
    let reply = decode_value(buffer, &mut pos)?;
    if pos != buffer.len() {
        return Err(RespError::protocol(format!(
            "{} trailing bytes after frame",
            buffer.len() - pos
        )));
    }
    reply.into_result()
}

/// Interprets one type line. `line` must not include the trailing CRLF.
pub fn parse_header(line: &[u8]) -> RespResult<Header> {
    let (&marker, rest) = line
        .split_first()
        .ok_or_else(|| RespError::protocol("empty type line"))?;

    match marker {
        b'+' => Ok(Header::Status(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(Header::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => Ok(Header::Integer(parse_i64(rest)?)),
        b'$' => Ok(Header::Bulk(parse_length(rest)?)),
        b'*' => Ok(Header::Array(parse_length(rest)?)),
        other => Err(RespError::protocol(format!(
            "unknown type marker {:?}",
            char::from(other)
        ))),
    }
}

/// Strips the trailing CRLF from a line returned by "read until CRLF".
pub fn strip_crlf(line: &[u8]) -> RespResult<&[u8]> {
    line.strip_suffix(CRLF)
        .ok_or_else(|| RespError::protocol("line is not CRLF terminated"))
}

/// Splits a bulk body (payload plus CRLF) into its payload.
pub fn bulk_payload(mut body: Bytes) -> RespResult<Bytes> {
    if !body.ends_with(CRLF) {
        return Err(RespError::protocol("bulk payload is not CRLF terminated"));
    }
    body.truncate(body.len() - CRLF.len());
    Ok(body)
}

struct ArrayLevel {
    expected: usize,
    items: Vec<Reply>,
}

// Arrays are assembled on an explicit stack so nesting depth never turns
// into call depth.
fn decode_value(buffer: &[u8], pos: &mut usize) -> RespResult<Reply> {
    let mut levels: Vec<ArrayLevel> = Vec::new();
    loop {
        let line = read_line(buffer, pos)?;
        let mut value = match parse_header(line)? {
            Header::Status(text) => Reply::Status(text),
            Header::Error(text) => Reply::Error(text),
            Header::Integer(value) => Reply::Integer(value),
            Header::Bulk(None) => Reply::BulkString(None),
            Header::Bulk(Some(len)) => {
                let end = pos
                    .checked_add(len)
                    .and_then(|end| end.checked_add(CRLF.len()))
                    .filter(|&end| end <= buffer.len())
                    .ok_or_else(|| RespError::protocol("truncated bulk payload"))?;
                let payload = bulk_payload(Bytes::copy_from_slice(&buffer[*pos..end]))?;
                *pos = end;
                Reply::BulkString(Some(payload))
            }
            Header::Array(None) => Reply::Array(None),
            Header::Array(Some(0)) => Reply::Array(Some(Vec::new())),
            Header::Array(Some(count)) => {
                if levels.len() >= MAX_NESTING_DEPTH {
                    return Err(RespError::protocol(format!(
                        "array nesting exceeds {} levels",
                        MAX_NESTING_DEPTH
                    )));
                }
                levels.push(ArrayLevel {
                    expected: count,
                    items: Vec::with_capacity(count.min(MAX_PREALLOCATED_ITEMS)),
                });
                continue;
            }
        };

        loop {
            let level = match levels.last_mut() {
                Some(level) => level,
                None => return Ok(value),
            };
            level.items.push(value);
            if level.items.len() < level.expected {
                break;
            }
            let items = levels.pop().map(|level| level.items).unwrap_or_default();
            value = Reply::Array(Some(items));
        }
    }
}

fn read_line<'a>(buffer: &'a [u8], pos: &mut usize) -> RespResult<&'a [u8]> {
    let start = *pos;
    let offset = buffer[start..]
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .ok_or_else(|| RespError::protocol("truncated frame: missing CRLF"))?;
    *pos = start + offset + CRLF.len();
    Ok(&buffer[start..start + offset])
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    let (value, used) = i64::from_radix_10_signed_checked(data);
    match value {
        Some(value)
            if used == data.len()
                && data.first() != Some(&b'+')
                && data.iter().any(u8::is_ascii_digit) =>
        {
            Ok(value)
        }
        _ => Err(RespError::protocol(format!(
            "invalid integer {:?}",
            String::from_utf8_lossy(data)
        ))),
    }
}

// `-1` is the null marker; any other negative length is malformed.
fn parse_length(data: &[u8]) -> RespResult<Option<usize>> {
    match parse_i64(data)? {
        -1 => Ok(None),
        len if len < 0 => Err(RespError::protocol(format!("negative length {}", len))),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| RespError::protocol(format!("length {} overflows usize", len))),
    }
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    loop {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
        if value == 0 {
            break;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command() {
        let command = Command::new("GET").arg("key");
        assert_eq!(&encode(&command).unwrap()[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_integer_arguments_by_string_length() {
        let command = Command::new("SET").arg("mykey").arg(123);
        assert_eq!(
            &encode(&command).unwrap()[..],
            b"*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$3\r\n123\r\n"
        );
    }

    #[test]
    fn encodes_empty_and_binary_arguments() {
        let command = Command::new("SET").arg("").arg(&b"a\r\nb"[..]);
        assert_eq!(
            &encode(&command).unwrap()[..],
            b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$4\r\na\r\nb\r\n"
        );
    }

    #[test]
    fn rejects_empty_command() {
        let err = encode(&Command::default()).unwrap_err();
        assert!(matches!(err, RespError::Encoding(_)));
    }

    #[test]
    fn decodes_scalars() {
        assert_eq!(decode(b"+OK\r\n"), Ok(Reply::status("OK")));
        assert_eq!(decode(b":42\r\n"), Ok(Reply::Integer(42)));
        assert_eq!(decode(b":-7\r\n"), Ok(Reply::Integer(-7)));
        assert_eq!(decode(b"$5\r\nhello\r\n"), Ok(Reply::bulk(&b"hello"[..])));
        assert_eq!(decode(b"$0\r\n\r\n"), Ok(Reply::bulk(Bytes::new())));
    }

    #[test]
    fn decodes_nulls_distinct_from_empty() {
        assert_eq!(decode(b"$-1\r\n"), Ok(Reply::BulkString(None)));
        assert_eq!(decode(b"*-1\r\n"), Ok(Reply::Array(None)));
        assert_eq!(decode(b"*0\r\n"), Ok(Reply::array(Vec::new())));
    }

    #[test]
    fn decodes_mixed_array_in_order() {
        let reply = decode(b"*2\r\n$3\r\nfoo\r\n:42\r\n").unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![Reply::bulk(&b"foo"[..]), Reply::Integer(42)])
        );
    }

    #[test]
    fn decodes_nested_arrays() {
        let reply = decode(b"*2\r\n*2\r\n+a\r\n$-1\r\n-ERR inner\r\n").unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![
                Reply::array(vec![Reply::status("a"), Reply::BulkString(None)]),
                Reply::Error("ERR inner".into()),
            ])
        );
    }

    fn nested(depth: usize) -> Vec<u8> {
        let mut frame = b"*1\r\n".repeat(depth);
        frame.extend_from_slice(b":1\r\n");
        frame
    }

    #[test]
    fn decodes_arrays_nested_to_depth_limit() {
        let reply = decode(&nested(MAX_NESTING_DEPTH)).unwrap();
        let mut depth = 0;
        let mut current = &reply;
        while let Some(items) = current.as_array() {
            assert_eq!(items.len(), 1);
            current = &items[0];
            depth += 1;
        }
        assert_eq!(depth, MAX_NESTING_DEPTH);
        assert_eq!(current, &Reply::Integer(1));
    }

    #[test]
    fn rejects_nesting_beyond_depth_limit() {
        assert!(matches!(
            decode(&nested(MAX_NESTING_DEPTH + 1)),
            Err(RespError::Protocol(_))
        ));
        assert!(matches!(decode(&nested(200_000)), Err(RespError::Protocol(_))));
    }

    #[test]
    fn rejects_explicit_plus_sign() {
        assert!(matches!(decode(b":+5\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"$+3\r\nfoo\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"*+1\r\n:1\r\n"), Err(RespError::Protocol(_))));
        assert!(parse_header(b"$+3").is_err());
        assert_eq!(parse_header(b":-5"), Ok(Header::Integer(-5)));
    }

    #[test]
    fn surfaces_server_error() {
        assert_eq!(
            decode(b"-ERR no such key\r\n"),
            Err(RespError::Server("ERR no such key".into()))
        );
    }

    #[test]
    fn rejects_unknown_marker() {
        assert!(matches!(decode(b"#bad\r\n"), Err(RespError::Protocol(_))));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(decode(b"$abc\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"*-2\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b":\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(
            decode(b":99999999999999999999\r\n"),
            Err(RespError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_truncated_and_trailing_data() {
        assert!(matches!(decode(b"$5\r\nhel"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"$3\r\nfooXY"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"*2\r\n:1\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"+OK\r\n+OK\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode(b"+OK"), Err(RespError::Protocol(_))));
    }

    #[test]
    fn parses_headers_without_bodies() {
        assert_eq!(parse_header(b"$5"), Ok(Header::Bulk(Some(5))));
        assert_eq!(parse_header(b"*-1"), Ok(Header::Array(None)));
        assert_eq!(parse_header(b"*0"), Ok(Header::Array(Some(0))));
        assert!(parse_header(b"").is_err());
    }
}
