//! # Incremental Reply Parser
//!
//! Purpose: Rebuild one reply at a time from a transport that only offers
//! "read until CRLF" and "read exactly N bytes", asking for exactly the bytes
//! the grammar says come next.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: Progress lives in the parser, not in the
//!    future's stack, so `next_reply` can be dropped between transport
//!    completions and resumed later without losing a partial frame.
//! 2. **Stack, Not Recursion**: Nested arrays push an `ArrayLevel`; finishing
//!    a level pops it and feeds the array to the level below.
//! 3. **Null Is Not Empty**: `$-1`/`*-1` short-circuit to null values, `*0`
//!    completes as an empty array.
//!
//! ## States
//!
//! ```text
//!                  +------------------- +/-/: line, $-1, *-1, *0 --> dispatch
//!                  |
//! AwaitingTypeLine +-- $n --> AwaitingBulkBody(n+2) -------------> dispatch
//!                  |
//!                  +-- *n --> AwaitingArrayElementHeader(n)
//!                                 |  ^        |
//!                             $m  |  | count  +-- *k: push level (nested)
//!                                 v  | left   |
//!                  AwaitingArrayElementBody(n, m)   count exhausted --> pop
//! ```

use bytes::Bytes;
use respline_common::codec::{
    bulk_payload, parse_header, strip_crlf, Header, CRLF, MAX_NESTING_DEPTH,
};
use respline_common::{RespError, RespResult, Reply};
use tracing::trace;

use crate::error::ClientResult;
use crate::transport::Transport;

/// Largest bulk payload accepted, matching the server-side default limit.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Observable position of the parser within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the type line of a new top-level frame.
    AwaitingTypeLine,
    /// Waiting for a top-level bulk body; counts payload plus CRLF.
    AwaitingBulkBody { remaining_bytes: usize },
    /// Waiting for the header line of the next element of the current array.
    AwaitingArrayElementHeader { remaining_count: usize },
    /// Waiting for the body of a bulk element of the current array.
    AwaitingArrayElementBody {
        remaining_count: usize,
        element_byte_length: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Line,
    Body { len: usize },
}

/// One array under construction.
#[derive(Debug)]
struct ArrayLevel {
    expected: usize,
    items: Vec<Reply>,
}

impl ArrayLevel {
    fn new(expected: usize) -> Self {
        ArrayLevel {
            expected,
            items: Vec::with_capacity(expected.min(1024)),
        }
    }

    fn remaining(&self) -> usize {
        self.expected - self.items.len()
    }
}

/// Incremental parser for one connection.
///
/// Holds at most one reply in construction at any time.
#[derive(Debug)]
pub struct ReplyParser {
    next: Next,
    levels: Vec<ArrayLevel>,
}

impl Default for ReplyParser {
    fn default() -> Self {
        ReplyParser::new()
    }
}

impl ReplyParser {
    pub fn new() -> Self {
        ReplyParser {
            next: Next::Line,
            levels: Vec::new(),
        }
    }

    /// Current state, expressed for the innermost array level.
    pub fn state(&self) -> ParserState {
        match (self.next, self.levels.last()) {
            (Next::Line, None) => ParserState::AwaitingTypeLine,
            (Next::Body { len }, None) => ParserState::AwaitingBulkBody {
                remaining_bytes: len + CRLF.len(),
            },
            (Next::Line, Some(level)) => ParserState::AwaitingArrayElementHeader {
                remaining_count: level.remaining(),
            },
            (Next::Body { len }, Some(level)) => ParserState::AwaitingArrayElementBody {
                remaining_count: level.remaining(),
                element_byte_length: len,
            },
        }
    }

    /// Number of arrays currently open.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Returns true between frames.
    pub fn is_idle(&self) -> bool {
        self.state() == ParserState::AwaitingTypeLine
    }

    /// Drops any partially built reply.
    pub fn reset(&mut self) {
        self.next = Next::Line;
        self.levels.clear();
    }

    /// Drives the transport until one complete reply is assembled.
    ///
    /// Cancel safe as long as the transport's reads are: every await is a
    /// single transport primitive and the parser state is updated only after
    /// it completes.
    ///
    /// # Errors
    /// `ClientError::Transport` when a read fails, `ClientError::Protocol`
    /// for malformed input (the partial reply is discarded).
    pub async fn next_reply<T>(&mut self, transport: &mut T) -> ClientResult<Reply>
    where
        T: Transport + ?Sized,
    {
        loop {
            let step = match self.next {
                Next::Line => {
                    let line = transport.read_until(CRLF).await?;
                    self.on_line(&line)
                }
                Next::Body { len } => {
                    let body = transport.read_exact(len + CRLF.len()).await?;
                    self.on_body(body)
                }
            };
            match step {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => {}
                Err(err) => {
                    self.reset();
                    return Err(err.into());
                }
            }
        }
    }

    fn on_line(&mut self, line: &[u8]) -> RespResult<Option<Reply>> {
        let header = parse_header(strip_crlf(line)?)?;
        trace!(depth = self.levels.len(), ?header, "type line");
        match header {
            Header::Status(text) => Ok(self.complete(Reply::Status(text))),
            Header::Error(text) => Ok(self.complete(Reply::Error(text))),
            Header::Integer(value) => Ok(self.complete(Reply::Integer(value))),
            Header::Bulk(None) => Ok(self.complete(Reply::BulkString(None))),
            Header::Bulk(Some(len)) => {
                if len > MAX_BULK_LEN {
                    return Err(RespError::Protocol(format!(
                        "bulk length {} exceeds limit {}",
                        len, MAX_BULK_LEN
                    )));
                }
                self.next = Next::Body { len };
                Ok(None)
            }
            Header::Array(None) => Ok(self.complete(Reply::Array(None))),
            Header::Array(Some(0)) => Ok(self.complete(Reply::Array(Some(Vec::new())))),
            Header::Array(Some(count)) => {
                if self.levels.len() >= MAX_NESTING_DEPTH {
                    return Err(RespError::Protocol(format!(
                        "array nesting exceeds {} levels",
                        MAX_NESTING_DEPTH
                    )));
                }
                self.levels.push(ArrayLevel::new(count));
                Ok(None)
            }
        }
    }

    fn on_body(&mut self, body: Bytes) -> RespResult<Option<Reply>> {
        self.next = Next::Line;
        let payload = bulk_payload(body)?;
        Ok(self.complete(Reply::BulkString(Some(payload))))
    }

    /// Feeds a finished value to the innermost open array, closing every
    /// level it completes. Returns the reply once the top level is done.
    fn complete(&mut self, value: Reply) -> Option<Reply> {
        let mut value = value;
        loop {
            let level = match self.levels.last_mut() {
                Some(level) => level,
                None => return Some(value),
            };
            level.items.push(value);
            if level.remaining() > 0 {
                return None;
            }
            let items = self.levels.pop().map(|level| level.items).unwrap_or_default();
            value = Reply::Array(Some(items));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::transport::StreamTransport;
    use rstest::rstest;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn parse_all(input: &'static [u8], chunk: usize, count: usize) -> Vec<ClientResult<Reply>> {
        let (client, mut server) = duplex(chunk);
        tokio::spawn(async move {
            let _ = server.write_all(input).await;
            let _ = server.shutdown().await;
        });
        let mut transport = StreamTransport::new(client);
        let mut parser = ReplyParser::new();
        let mut replies = Vec::new();
        for _ in 0..count {
            replies.push(parser.next_reply(&mut transport).await);
        }
        replies
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(4096)]
    #[tokio::test]
    async fn parses_every_frame_kind_regardless_of_chunking(#[case] chunk: usize) {
        let input: &'static [u8] =
            b"+OK\r\n-ERR nope\r\n:-12\r\n$5\r\nhello\r\n$-1\r\n$0\r\n\r\n*-1\r\n*0\r\n";
        let replies: Vec<Reply> = parse_all(input, chunk, 8)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            replies,
            vec![
                Reply::status("OK"),
                Reply::Error("ERR nope".into()),
                Reply::Integer(-12),
                Reply::bulk(&b"hello"[..]),
                Reply::BulkString(None),
                Reply::bulk(Bytes::new()),
                Reply::Array(None),
                Reply::array(Vec::new()),
            ]
        );
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[tokio::test]
    async fn preserves_mixed_and_nested_elements(#[case] chunk: usize) {
        let input: &'static [u8] =
            b"*4\r\n$3\r\nfoo\r\n:42\r\n*2\r\n+a\r\n*0\r\n$-1\r\n*1\r\n$2\r\nhi\r\n";
        let mut replies = parse_all(input, chunk, 2).await.into_iter();
        assert_eq!(
            replies.next().unwrap().unwrap(),
            Reply::array(vec![
                Reply::bulk(&b"foo"[..]),
                Reply::Integer(42),
                Reply::array(vec![Reply::status("a"), Reply::array(Vec::new())]),
                Reply::BulkString(None),
            ])
        );
        assert_eq!(
            replies.next().unwrap().unwrap(),
            Reply::array(vec![Reply::bulk(&b"hi"[..])])
        );
    }

    #[tokio::test]
    async fn binary_payload_may_contain_crlf() {
        let replies = parse_all(b"$4\r\na\r\nb\r\n", 1, 1).await;
        assert_eq!(replies[0].as_ref().unwrap(), &Reply::bulk(&b"a\r\nb"[..]));
    }

    #[tokio::test]
    async fn unknown_marker_is_protocol_error() {
        let replies = parse_all(b"#bad\r\n", 64, 1).await;
        assert!(matches!(replies[0], Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn missing_body_terminator_is_protocol_error() {
        let replies = parse_all(b"$3\r\nfooXY", 64, 1).await;
        assert!(matches!(replies[0], Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn nesting_beyond_depth_limit_is_protocol_error() {
        let mut input = b"*1\r\n".repeat(MAX_NESTING_DEPTH + 1);
        input.extend_from_slice(b":1\r\n");
        let input: &'static [u8] = Box::leak(input.into_boxed_slice());

        let replies = parse_all(input, 4096, 1).await;
        assert!(matches!(replies[0], Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn hangup_mid_frame_is_transport_error() {
        let replies = parse_all(b"*2\r\n:1\r\n", 64, 1).await;
        assert!(matches!(replies[0], Err(ClientError::Transport(_))));
    }

    #[test]
    fn walks_the_four_states() {
        let mut parser = ReplyParser::new();
        assert_eq!(parser.state(), ParserState::AwaitingTypeLine);

        assert_eq!(parser.on_line(b"$3\r\n").unwrap(), None);
        assert_eq!(parser.state(), ParserState::AwaitingBulkBody { remaining_bytes: 5 });
        let reply = parser.on_body(Bytes::from_static(b"foo\r\n")).unwrap();
        assert_eq!(reply, Some(Reply::bulk(&b"foo"[..])));
        assert!(parser.is_idle());

        assert_eq!(parser.on_line(b"*2\r\n").unwrap(), None);
        assert_eq!(
            parser.state(),
            ParserState::AwaitingArrayElementHeader { remaining_count: 2 }
        );
        assert_eq!(parser.on_line(b"$2\r\n").unwrap(), None);
        assert_eq!(
            parser.state(),
            ParserState::AwaitingArrayElementBody {
                remaining_count: 2,
                element_byte_length: 2
            }
        );
        assert_eq!(parser.on_body(Bytes::from_static(b"hi\r\n")).unwrap(), None);
        assert_eq!(
            parser.state(),
            ParserState::AwaitingArrayElementHeader { remaining_count: 1 }
        );
        let reply = parser.on_line(b":5\r\n").unwrap();
        assert_eq!(
            reply,
            Some(Reply::array(vec![Reply::bulk(&b"hi"[..]), Reply::Integer(5)]))
        );
        assert!(parser.is_idle());
    }

    #[test]
    fn null_markers_short_circuit() {
        let mut parser = ReplyParser::new();
        assert_eq!(parser.on_line(b"$-1\r\n").unwrap(), Some(Reply::BulkString(None)));
        assert_eq!(parser.on_line(b"*-1\r\n").unwrap(), Some(Reply::Array(None)));
        assert!(parser.on_line(b"*-3\r\n").is_err());
        assert!(parser.is_idle());
    }

    #[tokio::test]
    async fn resumes_after_cancellation_mid_frame() {
        let (client, mut server) = duplex(64);
        let mut transport = StreamTransport::new(client);
        let mut parser = ReplyParser::new();

        server.write_all(b"*2\r\n$3\r\nfoo\r\n").await.unwrap();
        let pending =
            tokio::time::timeout(Duration::from_millis(50), parser.next_reply(&mut transport)).await;
        assert!(pending.is_err());
        assert_eq!(
            parser.state(),
            ParserState::AwaitingArrayElementHeader { remaining_count: 1 }
        );

        server.write_all(b":42\r\n").await.unwrap();
        let reply = parser.next_reply(&mut transport).await.unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![Reply::bulk(&b"foo"[..]), Reply::Integer(42)])
        );
        assert_eq!(parser.depth(), 0);
    }
}
